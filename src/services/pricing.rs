use crate::{
    entities::{product, PriceLevel},
    errors::ServiceError,
};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::ActiveEnum;
use rust_decimal_macros::dec;

/// Fixed promo discount applied to the whole order
pub const PROMO_MULTIPLIER: Decimal = dec!(0.9);

/// Money is kept at two decimal places
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Unit price for `level`: the level price when it is set and positive,
/// otherwise the base price. A product without a base price cannot be sold.
pub fn resolve_price(product: &product::Model, level: PriceLevel) -> Result<Decimal, ServiceError> {
    let level_price = match level {
        PriceLevel::Wholesale => product.wholesale_price,
        PriceLevel::Promotional => product.promotional_price,
        PriceLevel::Retail => product.retail_price,
    };

    if let Some(price) = level_price.filter(|p| *p > Decimal::ZERO) {
        return Ok(round_money(price));
    }

    product.price.map(round_money).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "items: product {} has no {} price and no base price",
            product.code,
            level.to_value()
        ))
    })
}

pub fn line_amount(price: Decimal, quantity: i32) -> Decimal {
    round_money(price * Decimal::from(quantity))
}

/// Sum of line amounts, discounted when the order is a promo order
pub fn order_total<I>(amounts: I, is_promo: bool) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    let sum: Decimal = amounts.into_iter().sum();
    if is_promo {
        round_money(sum * PROMO_MULTIPLIER)
    } else {
        round_money(sum)
    }
}
