//! One [`Updater`] runs per subscribed item, decoupling the socket's read
//! loop from callback execution: a slow or misbehaving subscriber callback
//! stalls only its own item's updater, never the shared subscribe
//! connection. A `Shutdown` sentinel on the same queue lets the loop end
//! cleanly instead of being cancelled mid-update.

use mktl_core::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub enum UpdateMsg {
    Update { value: Value, time: f64 },
    Shutdown,
}

pub struct Updater {
    tx: mpsc::UnboundedSender<UpdateMsg>,
    task: JoinHandle<()>,
}

impl Updater {
    pub fn start<F>(apply: F) -> Self
    where
        F: Fn(Value, f64) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<UpdateMsg>();

        let task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    UpdateMsg::Update { value, time } => apply(value, time),
                    UpdateMsg::Shutdown => break,
                }
            }
        });

        Self { tx, task }
    }

    pub fn push(&self, value: Value, time: f64) {
        let _ = self.tx.send(UpdateMsg::Update { value, time });
    }

    pub async fn shutdown(self) {
        let _ = self.tx.send(UpdateMsg::Shutdown);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn updater_applies_updates_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let updater = Updater::start(move |v, _t| seen_clone.lock().push(v));

        updater.push(Value::Int(1), 0.0);
        updater.push(Value::Int(2), 0.0);
        updater.push(Value::Int(3), 0.0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        updater.shutdown().await;

        assert_eq!(*seen.lock(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[tokio::test]
    async fn shutdown_sentinel_stops_the_loop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let updater = Updater::start(move |v, _t| seen_clone.lock().push(v));

        updater.push(Value::Int(1), 0.0);
        updater.shutdown().await;

        // Pushing after shutdown has no effect: the receiver is long gone.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.lock().len(), 1);
    }
}
