//! The `publish` subcommand: decoded values to MQTT.

use anyhow::{Context, Result};
use powercounter::process;

use crate::cli::{Cli, PublishCmd};
use crate::mqtt::MqttInterface;
use crate::serial;

pub fn run(cli: &Cli, cmd: &PublishCmd) -> Result<()> {
    let (input, finite) = serial::open_input(cli)?;
    let mut mqtt = MqttInterface::new(cmd);

    let result = process(
        input,
        finite,
        |_file_data, _sml_file| {},
        |obis, value, _unit| mqtt.publish(obis, value),
    )
    .context("processing the input stream failed");

    mqtt.close();
    result
}
