use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::entities::OrderStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Domain events emitted after a mutation has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: i32,
        order_number: String,
    },
    OrderUpdated(i32),
    OrderStatusChanged {
        order_id: i32,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderDeleted {
        order_id: i32,
        responsible_id: Option<i32>,
        order_date: NaiveDate,
    },
    PlanCreated(i32),
    PlanUpdated(i32),
    PlanDeleted(i32),
    PlanRecalculated {
        plan_id: i32,
        assignments: usize,
    },
    ManagerChanged {
        user_id: i32,
        manager_id: Option<i32>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderUpdated(_) => "order_updated",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderDeleted { .. } => "order_deleted",
            Event::PlanCreated(_) => "plan_created",
            Event::PlanUpdated(_) => "plan_updated",
            Event::PlanDeleted(_) => "plan_deleted",
            Event::PlanRecalculated { .. } => "plan_recalculated",
            Event::ManagerChanged { .. } => "manager_changed",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::counter!("tirecrm.events.processed", 1, "event" => event.name());

        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
            } => info!(order_id, %order_number, "Order created"),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(order_id, ?old_status, ?new_status, "Order status changed"),
            Event::OrderDeleted {
                order_id,
                responsible_id,
                order_date,
            } => info!(order_id, ?responsible_id, %order_date, "Order deleted"),
            Event::PlanRecalculated {
                plan_id,
                assignments,
            } => info!(plan_id, assignments, "Plan progress recalculated"),
            Event::ManagerChanged {
                user_id,
                manager_id,
            } => info!(user_id, ?manager_id, "Manager changed"),
            other => debug!(event = other.name(), payload = ?other, "Event received"),
        }
    }

    info!("Event channel closed, stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        sender.send(Event::PlanCreated(3)).await.unwrap();
        assert_eq!(rx.recv().await, Some(Event::PlanCreated(3)));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender.send(Event::PlanDeleted(1)).await.is_err());
    }

    #[tokio::test]
    async fn processing_loop_ends_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(process_events(rx));
        tx.send(Event::OrderUpdated(1)).await.unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
