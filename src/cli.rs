//! Command line definition of the `powercounter` application.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Analyzes the data of an electricity meter sent over an infrared LED
/// using an USB UART adapter.
///
/// The decoded OBIS values can be printed on stdout or published via MQTT;
/// the raw serial data can be captured into a file for development and
/// debugging.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Increase the verbosity by setting the logging level to debug.
    #[arg(short, long)]
    pub verbose: bool,

    /// Decrease the verbosity by disabling all log output.
    #[arg(short, long, conflicts_with = "verbose")]
    pub silent: bool,

    /// Suppress duplicate warnings or errors for the given amount of seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 60.0)]
    pub suppress_time: f64,

    /// The serial port device to open.
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    pub device: String,

    /// Instead of using a serial port, read the data from the specified
    /// data file (previously captured using the capture command).
    #[arg(short, long, value_name = "DATAFILE")]
    pub input_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture raw data from the serial port and save it in a file.
    Capture(CaptureCmd),
    /// Parse the input data and print the decoded values on stdout.
    Print,
    /// Parse the input data and publish the decoded values via MQTT.
    Publish(PublishCmd),
}

#[derive(Debug, Args)]
pub struct CaptureCmd {
    /// The output file to store the raw data.
    #[arg(value_name = "OUTPUT_FILE")]
    pub output_file: PathBuf,
}

#[derive(Debug, Args)]
pub struct PublishCmd {
    /// MQTT host.
    #[arg(long, default_value = "192.168.1.70")]
    pub mqtt_host: String,

    /// MQTT port.
    #[arg(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    /// MQTT username.
    #[arg(long, default_value = "mqtt")]
    pub mqtt_username: String,

    /// MQTT password.
    #[arg(long, default_value = "mqtt")]
    pub mqtt_password: String,

    /// Comma separated list of OBIS IDs and the corresponding MQTT topics.
    #[arg(
        long,
        value_name = "OBIS=TOPIC,...",
        default_value = "1-0:1.8.0*255=power/total,1-0:16.7.0*255=power/rate,1-0:2.8.0*255=power/feed-total"
    )]
    pub mqtt_topics: String,
}
