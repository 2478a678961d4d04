//! Periodic tick driver.
//!
//! Fires on a fixed cadence and advances the simulation by the wall-clock
//! time that actually elapsed, so a delayed firing produces one bigger step
//! instead of losing time. Simulation and listener fan-out run under a
//! single lock acquisition: a tick is indivisible from the API's point of
//! view.

use crate::app::{Listeners, SharedApp};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Advances the world by `dt` and delivers the tick to all listeners, all
/// under one lock acquisition. Shared by the ticker and the manual tick
/// endpoint.
pub async fn advance(app: &SharedApp, listeners: &Listeners, dt: Duration) {
    let mut app = app.lock().await;
    app.tick(dt);
    listeners.on_tick(&mut app, dt).await;
}

pub struct Ticker {
    app: SharedApp,
    listeners: Arc<Listeners>,
    period: Duration,
}

impl Ticker {
    pub fn new(app: SharedApp, listeners: Arc<Listeners>, period: Duration) -> Self {
        Self {
            app,
            listeners,
            period,
        }
    }

    /// Spawns the driver task. Aborting the handle stops ticking; no
    /// partial tick can be observed because each tick holds the state lock.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(self.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first firing of a tokio interval is immediate; consume it
            // so `last_tick` marks the start of the first real period.
            timer.tick().await;
            let mut last_tick = Instant::now();

            loop {
                timer.tick().await;
                let now = Instant::now();
                let delta = now - last_tick;
                last_tick = now;

                advance(&self.app, &self.listeners, delta).await;
                debug!("tick advanced by {} ms", delta.as_millis());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Application, SpawnPolicy};
    use crate::config::parse_game;
    use tokio::sync::Mutex;

    const CONFIG: &str = r#"{
        "lootGeneratorConfig": { "period": 5000.0, "probability": 0.0 },
        "maps": [
            {
                "id": "town", "name": "Town",
                "lootTypes": [ { "value": 1 } ],
                "roads": [ { "x0": 0, "y0": 0, "x1": 10 } ],
                "buildings": [], "offices": []
            }
        ]
    }"#;

    #[tokio::test]
    async fn test_advance_ticks_simulation() {
        let mut application =
            Application::new(parse_game(CONFIG).unwrap(), SpawnPolicy::FirstRoadStart);
        let (id, _) = application.join_game("town", "Rex").unwrap();
        let app: SharedApp = Arc::new(Mutex::new(application));
        let listeners = Listeners::default();

        advance(&app, &listeners, Duration::from_millis(250)).await;

        let app = app.lock().await;
        let dog = app.game().find_session("town").unwrap().dog(id).unwrap();
        assert_eq!(dog.age, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_fires_periodically() {
        let application =
            Application::new(parse_game(CONFIG).unwrap(), SpawnPolicy::FirstRoadStart);
        let app: SharedApp = Arc::new(Mutex::new(application));
        let listeners = Arc::new(Listeners::default());

        let mut application = app.lock().await;
        application.join_game("town", "Rex").unwrap();
        drop(application);

        let handle = Ticker::new(app.clone(), listeners, Duration::from_millis(100)).start();
        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.abort();

        let app = app.lock().await;
        let session = app.game().find_session("town").unwrap();
        let age = session.dogs().values().next().unwrap().age;
        assert!(age >= Duration::from_millis(200), "age was {age:?}");
    }
}
