//! In-process receiver/caller run over the loopback environment.

use crate::call_flow::{CallTarget, CallerFlow, ReceiverFlow};
use crate::config::PeerlinkConfig;
use crate::environment::LoopbackEnvironment;
use crate::error::{PeerlinkError, Result};
use crate::events::{EventFilter, PeerlinkEvent};
use crate::orchestrator::ConnectionOrchestrator;
use crate::rendezvous::{PushCredential, WakeNotifier};
use std::time::Duration;
use tracing::{info, warn};

/// Push token the demo receiver hands out
pub const DEMO_TOKEN: &str = "ab12cd34:demo-receiver-token";

#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Start with the receiver offline so the caller has to wake it
    pub wake: bool,
    /// Lines of text sent over the data channel once connected
    pub messages: Vec<String>,
    /// Toggle the caller's camera once connected
    pub switch_camera: bool,
    pub connect_timeout: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            wake: false,
            messages: vec!["Olá, tudo bem?".to_string()],
            switch_camera: true,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    pub receiver_id: String,
    pub caller_id: String,
    pub woke_receiver: bool,
    pub delivered: Vec<String>,
    pub switched_to: Option<String>,
}

pub async fn run_demo(config: PeerlinkConfig, options: DemoOptions) -> Result<DemoReport> {
    let env = LoopbackEnvironment::new(config);
    let receiver = ConnectionOrchestrator::new(env.participant(env.virtual_media()));
    let caller = ConnectionOrchestrator::new(env.participant(env.virtual_media()));
    let mut inbox = receiver.context().events.subscribe_filtered(
        EventFilter::EventTypes(vec!["data_channel_message"]),
        "demo-receiver",
    );

    let receiver_flow = ReceiverFlow::new(receiver.clone());
    let caller_flow = CallerFlow::new(caller.clone());
    let target = CallTarget::from_push_token(DEMO_TOKEN);

    let (outcome, receiver_session) = if options.wake {
        // The receiver handed out its token in an earlier session
        env.rendezvous
            .register_token(&target.id, &PushCredential::fcm(DEMO_TOKEN))
            .await?;
        let mut wakes = env.rendezvous.subscribe_wakes();
        let woken = tokio::spawn(async move {
            match wakes.recv().await {
                Ok(wake) => {
                    info!("Receiver woken by {}", wake.caller_id);
                    receiver_flow.start(Some(DEMO_TOKEN)).await
                }
                Err(e) => Err(PeerlinkError::component("demo", e.to_string())),
            }
        });

        let outcome = match caller_flow.call(&target).await {
            Ok(outcome) => outcome,
            Err(e) => {
                woken.abort();
                return Err(e);
            }
        };
        let session = woken
            .await
            .map_err(|e| PeerlinkError::component("demo", e.to_string()))??;
        (outcome, session)
    } else {
        let session = receiver_flow.start(Some(DEMO_TOKEN)).await?;
        info!("Receiver {} is online", session.id());
        (caller_flow.call(&target).await?, session)
    };
    let receiver_id = receiver_session.id().to_string();

    if !caller.wait_until_connected(options.connect_timeout).await
        || !receiver.wait_until_connected(options.connect_timeout).await
    {
        caller_flow.teardown().await;
        receiver_session.teardown().await;
        return Err(PeerlinkError::system("peers did not connect in time"));
    }
    info!("{} and {} are connected", outcome.caller_id, receiver_id);

    let mut delivered = Vec::new();
    for text in &options.messages {
        send_when_open(&caller, text, options.connect_timeout).await?;
        match tokio::time::timeout(options.connect_timeout, inbox.recv()).await {
            Ok(Ok(PeerlinkEvent::DataChannelMessage { text })) => delivered.push(text),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Receiver inbox failed: {}", e),
            Err(_) => warn!("Message '{}' was not delivered in time", text),
        }
    }

    let switched_to = if options.switch_camera {
        match caller.switch_camera().await {
            Ok(outcome) => Some(outcome.device.label),
            Err(e) => {
                warn!("Camera switch skipped: {}", e);
                None
            }
        }
    } else {
        None
    };

    caller_flow.teardown().await;
    receiver_session.teardown().await;

    Ok(DemoReport {
        receiver_id,
        caller_id: outcome.caller_id,
        woke_receiver: outcome.woke_receiver,
        delivered,
        switched_to,
    })
}

/// The data channel opens just after the connection; retry briefly
async fn send_when_open(
    orchestrator: &ConnectionOrchestrator,
    text: &str,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match orchestrator.send_text(text).await {
            Ok(()) => return Ok(()),
            Err(e) if tokio::time::Instant::now() >= deadline => return Err(e),
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
}
