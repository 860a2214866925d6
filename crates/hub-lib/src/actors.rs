use ractor::{Actor, ActorProcessingErr, ActorRef, SpawnErr, SupervisionEvent};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info};

use crate::tasks;

/// Supervises the hub's long-running actors.
///
/// Stops its children once the shutdown token is cancelled. A child that
/// fails requests shutdown of the whole hub.
pub struct RootActor;

#[derive(Debug)]
pub enum RootMessage {
    Shutdown(String),
}

impl RootActor {
    pub async fn start(
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Result<ActorRef<RootMessage>, SpawnErr> {
        let (actor, _) =
            Actor::spawn(Some("hub root".to_string()), RootActor, (tracker, shutdown)).await?;
        Ok(actor)
    }
}

#[async_trait::async_trait]
impl Actor for RootActor {
    type Msg = RootMessage;
    type State = ();
    type Arguments = (TaskTracker, CancellationToken);

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        (tracker, shutdown): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracker.spawn(async move {
            shutdown.cancelled().await;
            let _ = myself.cast(RootMessage::Shutdown("shutdown token cancelled".to_string()));
        });
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RootMessage::Shutdown(reason) => {
                info!("Stopping hub actors: {}", reason);
                myself.stop_children(Some(reason.clone()));
                myself.stop(Some(reason));
            }
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorStarted(who) => {
                debug!("Hub actor {:?} started", who.get_name());
            }
            SupervisionEvent::ActorTerminated(who, _, reason) => {
                debug!("Hub actor {:?} stopped: {:?}", who.get_name(), reason);
            }
            SupervisionEvent::ActorFailed(who, err) => {
                error!("Hub actor {:?} failed: {}", who.get_name(), err);
                tasks::request_shutdown("a supervised actor failed");
            }
            _ => {}
        }
        Ok(())
    }
}
