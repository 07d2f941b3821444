//! MQTT publishing of decoded OBIS values.

use std::collections::HashMap;
use std::thread::JoinHandle;
use std::time::Duration;

use rumqttc::{Client, MqttOptions, QoS};

use crate::cli::PublishCmd;

/// Publishes OBIS values on the topics configured on the command line.
///
/// The connection is established asynchronously by an event loop thread;
/// values published before the connection is up are queued by the client.
pub struct MqttInterface {
    client: Client,
    topics: HashMap<String, String>,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttInterface {
    /// Creates the client and starts connecting to the broker.
    pub fn new(cmd: &PublishCmd) -> MqttInterface {
        log::debug!("Parsing topic definition string {}.", cmd.mqtt_topics);
        let mut topics = HashMap::new();
        for item in cmd.mqtt_topics.split(',') {
            match parse_topic_item(item) {
                Some((obis, topic)) => {
                    log::debug!("Found OBIS ID {} mapped to MQTT topic {}.", obis, topic);
                    topics.insert(obis.to_string(), topic.to_string());
                }
                None => {
                    log::error!(
                        "Ignoring MQTT item {}. Please use <OBIS ID>=<MQTT topic> items!",
                        item
                    );
                }
            }
        }

        log::debug!(
            "Create MQTT client and connect to MQTT server {}:{}.",
            cmd.mqtt_host,
            cmd.mqtt_port
        );
        let mut options = MqttOptions::new("powercounter", cmd.mqtt_host.as_str(), cmd.mqtt_port);
        options.set_credentials(cmd.mqtt_username.as_str(), cmd.mqtt_password.as_str());
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut connection) = Client::new(options, 16);

        let event_loop = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(event) => log::debug!("MQTT event: {:?}", event),
                    Err(e) => {
                        log::error!("MQTT connection error: {}!", e);
                        // the iterator retries immediately, don't spin
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        });

        MqttInterface {
            client,
            topics,
            event_loop: Some(event_loop),
        }
    }

    /// Publishes a new value for the given OBIS ID. Values without a
    /// mapped topic are ignored.
    pub fn publish(&mut self, obis_id: &str, value: f64) {
        let Some(topic) = self.topics.get(obis_id) else {
            return;
        };
        log::debug!(
            "Publishing OBIS ID {} on topic {} with value {}.",
            obis_id,
            topic,
            value
        );
        if let Err(e) = self
            .client
            .try_publish(topic.as_str(), QoS::AtLeastOnce, false, value.to_string())
        {
            log::error!("MQTT publish failed: {}!", e);
        }
    }

    /// Disconnects from the broker and stops the event loop thread.
    pub fn close(mut self) {
        log::debug!("Close MQTT client.");
        if let Err(e) = self.client.disconnect() {
            log::error!("MQTT disconnect failed: {}!", e);
        }
        if let Some(handle) = self.event_loop.take() {
            let _ = handle.join();
        }
    }
}

/// Splits one `OBIS=topic` item; items with zero or multiple `=` are
/// invalid.
fn parse_topic_item(item: &str) -> Option<(&str, &str)> {
    let (obis, topic) = item.split_once('=')?;
    if topic.contains('=') {
        return None;
    }
    Some((obis, topic))
}
