//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(name = "wifi-provisioning", version, author)]
#[clap(about = "Provision WiFi credentials from a nearby phone over Bluetooth LE")]
pub struct CliArgs {
    /// Wireless network interface name
    #[clap(short, long, default_value = "wlan0")]
    pub interface: String,

    /// Bluetooth name advertised to peers
    #[clap(short = 'n', long, default_value = "PiWiFiSetup")]
    pub device_name: String,

    /// Location of the stored credential record
    #[clap(long, default_value = "/var/lib/wifi-provisioning/credentials.json")]
    pub store_path: PathBuf,

    /// Re-apply the stored credentials at startup
    #[clap(long)]
    pub restore_on_start: bool,

    /// Seconds to wait for a peer's response to a credential request
    #[clap(long, default_value = "30")]
    pub response_timeout: u64,

    /// Seconds to wait for a peer to pick up a credential request
    #[clap(long, default_value = "10")]
    pub send_timeout: u64,

    /// Credential requests per exchange before giving up
    #[clap(long, default_value = "3")]
    pub max_attempts: u32,

    /// Base delay in seconds between credential requests
    #[clap(long, default_value = "1")]
    pub retry_backoff: u64,

    /// Seconds a finished exchange lingers before it is retired
    #[clap(long, default_value = "5")]
    pub retire_after: u64,

    /// Connectivity checks after applying credentials
    #[clap(long, default_value = "5")]
    pub verify_polls: u32,

    /// Base delay in seconds between connectivity checks
    #[clap(long, default_value = "2")]
    pub verify_backoff: u64,

    /// Maximum delay in seconds between connectivity checks
    #[clap(long, default_value = "16")]
    pub verify_backoff_cap: u64,

    /// Enable the JSON-RPC status socket
    #[clap(long)]
    pub enable_unix_socket: bool,

    /// Path for Unix socket
    #[clap(long, default_value = "/run/wifi-provisioning.sock")]
    pub socket_path: String,

    /// Socket file permissions (octal, e.g., 660)
    #[clap(long, default_value = "660", value_parser = parse_octal_mode)]
    pub socket_mode: u32,
}

fn parse_octal_mode(value: &str) -> Result<u32, String> {
    match u32::from_str_radix(value, 8) {
        Ok(mode) if mode <= 0o777 => Ok(mode),
        Ok(_) => Err(format!("mode out of range: {}", value)),
        Err(e) => Err(format!("not an octal mode: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let args = CliArgs::parse_from(["wifi-provisioning"]);
        assert_eq!(args.interface, "wlan0");
        assert_eq!(args.device_name, "PiWiFiSetup");
        assert_eq!(args.max_attempts, 3);
        assert_eq!(args.verify_polls, 5);
        assert_eq!(args.socket_mode, 0o660);
        assert!(!args.enable_unix_socket);
        assert!(!args.restore_on_start);
    }

    #[test]
    fn test_socket_mode_is_octal() {
        let args = CliArgs::parse_from(["wifi-provisioning", "--socket-mode", "600"]);
        assert_eq!(args.socket_mode, 0o600);

        assert!(CliArgs::try_parse_from(["wifi-provisioning", "--socket-mode", "999"]).is_err());
        assert!(CliArgs::try_parse_from(["wifi-provisioning", "--socket-mode", "7777"]).is_err());
    }
}
