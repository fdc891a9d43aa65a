use crate::config::Config;
use crate::publisher::OutboundMessage;
use anyhow::{anyhow, Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS, Transport};
use std::fs;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Reads the CA bundle once so a bad path fails startup rather than the first connect.
pub fn load_transport(config: &Config) -> Result<Transport> {
    if !config.mqtt_use_tls {
        return Ok(Transport::Tcp);
    }
    let path = config
        .mqtt_ca_cert_path
        .as_ref()
        .ok_or_else(|| anyhow!("TLS requested without a CA certificate"))?;
    let ca = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded broker CA certificate");
    Ok(Transport::tls(ca, None, None))
}

/// Drains outbound messages into the broker, one QoS 0 publish each. A failed publish is
/// logged and dropped; a dropped session is re-created.
pub async fn run_mqtt_publisher(
    config: Config,
    transport: Transport,
    rx: mpsc::Receiver<OutboundMessage>,
) -> Result<()> {
    let mut rx = rx;

    loop {
        let mut opts = mqtt_options(&config);
        opts.set_transport(transport.clone());
        let (client, eventloop) = AsyncClient::new(opts, 64);
        let mut poller = spawn_poller(eventloop);

        tracing::info!(host = %config.mqtt_host, port = config.mqtt_port, "MQTT session started");

        let last_err = loop {
            tokio::select! {
                res = &mut poller => {
                    break match res {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(err),
                        Err(err) => Some(err.into()),
                    };
                }

                maybe = rx.recv() => {
                    let Some(message) = maybe else {
                        poller.abort();
                        let _ = client.disconnect().await;
                        return Ok(());
                    };
                    let bytes = message.payload.len();
                    match client
                        .publish(message.topic.clone(), QoS::AtMostOnce, false, message.payload)
                        .await
                    {
                        Ok(()) => tracing::debug!(topic = %message.topic, bytes, "queued message"),
                        Err(err) => tracing::warn!(error = %err, topic = %message.topic, "failed to publish message"),
                    }
                }
            }
        };

        poller.abort();
        tracing::warn!(error = ?last_err, "MQTT connection dropped; reconnecting");
        sleep(Duration::from_secs(1)).await;
    }
}

fn spawn_poller(mut eventloop: rumqttc::EventLoop) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        loop {
            let event = eventloop.poll().await.map_err(|err| anyhow!(err))?;
            if let Some(pkid) = sent_publish(&event) {
                tracing::info!(pkid, "sent message");
            }
        }
    })
}

/// Packet id of a publish the event loop has just written to the socket.
fn sent_publish(event: &Event) -> Option<u16> {
    match event {
        Event::Outgoing(Outgoing::Publish(pkid)) => Some(*pkid),
        _ => None,
    }
}

fn mqtt_options(config: &Config) -> MqttOptions {
    let mut opts = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    opts.set_keep_alive(config.mqtt_keepalive());
    if let Some(username) = &config.mqtt_username {
        opts.set_credentials(
            username.clone(),
            config.mqtt_password.clone().unwrap_or_default(),
        );
    }
    opts
}
