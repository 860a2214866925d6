use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use strum::AsRefStr;
use tracing::{debug, error, info, warn};

use super::HubService;

/// Periodically reaps expired conditional updates and retries disputes
/// left pending.
pub struct SweeperActor {
    service: Arc<HubService>,
}

impl SweeperActor {
    pub fn new(service: Arc<HubService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, AsRefStr)]
pub enum SweeperMessage {
    PeriodicCheck,
}

#[async_trait::async_trait]
impl Actor for SweeperActor {
    type Msg = SweeperMessage;
    type State = ();
    type Arguments = Duration;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        interval: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        myself.send_interval(interval, || SweeperMessage::PeriodicCheck);
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SweeperMessage::PeriodicCheck => match self.service.sweep().await {
                Ok(summary) => {
                    if summary.routing.discarded.is_empty() && summary.disputes.is_empty() {
                        debug!("Sweep at height {}: nothing to do", summary.height);
                    } else {
                        info!(
                            "Sweep at height {}: {} conditional updates discarded, {} disputes retried",
                            summary.height,
                            summary.routing.discarded.len(),
                            summary.disputes.len()
                        );
                    }
                    for loss in &summary.routing.losses {
                        error!(
                            "Unrecovered routing loss of {} on channel {}",
                            loss.amount, loss.channel_id
                        );
                    }
                }
                Err(err) => warn!("Sweep failed: {}", err),
            },
        }
        Ok(())
    }
}
