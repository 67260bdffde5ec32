use clap::{Arg, ArgAction, ArgMatches, Command};
use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use echoprobe::config::MAX_PAYLOAD_SIZE;
use echoprobe::{ProbeConfig, Verbosity};

use crate::dns::FamilyPreference;

#[derive(Debug, Clone, PartialEq)]
pub struct PingArgs {
    pub target: String,
    pub count: u64,
    pub interval: Duration,
    pub size: usize,
    pub timeout: Duration,
    pub deadline: Option<Duration>,
    pub traffic_class: u8,
    pub source_address: Option<IpAddr>,
    pub verbosity: Verbosity,
    pub family: FamilyPreference,
    pub waypoints: Vec<Ipv6Addr>,
}

impl Default for PingArgs {
    fn default() -> Self {
        let defaults = ProbeConfig::default();
        Self {
            target: String::new(),
            count: defaults.count,
            interval: defaults.interval,
            size: defaults.payload_size,
            timeout: defaults.timeout,
            deadline: None,
            traffic_class: defaults.traffic_class,
            source_address: None,
            verbosity: defaults.verbosity,
            family: FamilyPreference::Any,
            waypoints: Vec::new(),
        }
    }
}

impl PingArgs {
    /// Build the engine configuration once the target has been resolved.
    pub fn to_config(&self, destination: IpAddr) -> ProbeConfig {
        ProbeConfig {
            destination: Some(destination),
            verbosity: self.verbosity,
            interval: self.interval,
            payload_size: self.size,
            count: self.count,
            source: self.source_address,
            timeout: self.timeout,
            traffic_class: self.traffic_class,
            waypoints: self.waypoints.clone(),
            deadline: self.deadline,
        }
    }
}

pub fn build_cli() -> Command {
    Command::new("echoprobe")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Send ICMP echo probes and report round-trip statistics")
        .arg(
            Arg::new("target")
                .help("Target hostname or IP address")
                .required(true)
                .index(1)
        )
        .arg(
            Arg::new("count")
                .short('c')
                .help("Stop after sending count probes")
                .value_name("count")
                .value_parser(clap::value_parser!(u64))
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .help("Seconds to wait between probes")
                .value_name("interval")
                .value_parser(clap::value_parser!(f64))
        )
        .arg(
            Arg::new("size")
                .short('s')
                .help("Number of data bytes to send")
                .value_name("size")
                .value_parser(clap::value_parser!(usize))
        )
        .arg(
            Arg::new("timeout")
                .short('W')
                .help("Seconds to wait for replies when no round-trip time is known")
                .value_name("timeout")
                .value_parser(clap::value_parser!(f64))
        )
        .arg(
            Arg::new("deadline")
                .short('w')
                .help("Stop after this many seconds regardless of probes sent")
                .value_name("deadline")
                .value_parser(clap::value_parser!(f64))
        )
        .arg(
            Arg::new("traffic_class")
                .short('Q')
                .help("Traffic class (IPv4 TOS byte)")
                .value_name("tclass")
                .value_parser(clap::value_parser!(u8))
        )
        .arg(
            Arg::new("source_address")
                .short('I')
                .help("Source address to use")
                .value_name("srcaddr")
                .value_parser(clap::value_parser!(IpAddr))
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .help("Only print the header and the closing statistics")
                .action(ArgAction::SetTrue)
                .conflicts_with("silent")
        )
        .arg(
            Arg::new("silent")
                .long("silent")
                .help("Print nothing")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("waypoints")
                .long("waypoints")
                .help("IPv6 loose source route along host-list")
                .value_name("host-list")
                .value_delimiter(',')
                .value_parser(clap::value_parser!(Ipv6Addr))
        )
        .arg(
            Arg::new("force_ipv4")
                .short('4')
                .help("Force using IPv4")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("force_ipv6")
                .short('6')
                .help("Force using IPv6")
                .action(ArgAction::SetTrue)
        )
}

pub fn parse_args() -> anyhow::Result<PingArgs> {
    args_from_matches(&build_cli().get_matches())
}

#[cfg(test)]
fn parse_args_from<I, T>(argv: I) -> anyhow::Result<PingArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    args_from_matches(&build_cli().try_get_matches_from(argv)?)
}

fn args_from_matches(matches: &ArgMatches) -> anyhow::Result<PingArgs> {
    let mut args = PingArgs::default();

    args.target = matches
        .get_one::<String>("target")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing target"))?;

    if let Some(count) = matches.get_one::<u64>("count") {
        args.count = *count;
    }

    if let Some(seconds) = matches.get_one::<f64>("interval") {
        args.interval = seconds_arg("interval", *seconds)?;
    }

    if let Some(size) = matches.get_one::<usize>("size") {
        args.size = *size;
    }

    if let Some(seconds) = matches.get_one::<f64>("timeout") {
        args.timeout = seconds_arg("timeout", *seconds)?;
    }

    if let Some(seconds) = matches.get_one::<f64>("deadline") {
        args.deadline = Some(seconds_arg("deadline", *seconds)?);
    }

    if let Some(tclass) = matches.get_one::<u8>("traffic_class") {
        args.traffic_class = *tclass;
    }

    if let Some(source_address) = matches.get_one::<IpAddr>("source_address") {
        args.source_address = Some(*source_address);
    }

    if let Some(hosts) = matches.get_many::<Ipv6Addr>("waypoints") {
        args.waypoints = hosts.copied().collect();
    }

    args.verbosity = if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else {
        Verbosity::Verbose
    };

    // Validation
    let force_ipv4 = matches.get_flag("force_ipv4");
    let force_ipv6 = matches.get_flag("force_ipv6");
    if force_ipv4 && force_ipv6 {
        return Err(anyhow::anyhow!("Cannot force both IPv4 and IPv6"));
    }
    args.family = match (force_ipv4, force_ipv6) {
        (true, _) => FamilyPreference::V4Only,
        (_, true) => FamilyPreference::V6Only,
        _ => FamilyPreference::Any,
    };
    if !args.waypoints.is_empty() {
        if force_ipv4 {
            return Err(anyhow::anyhow!("Waypoints can only be used with IPv6"));
        }
        args.family = FamilyPreference::V6Only;
    }

    if args.size > MAX_PAYLOAD_SIZE {
        return Err(anyhow::anyhow!(
            "Bad value for option -s, valid range is from 0 to {}",
            MAX_PAYLOAD_SIZE
        ));
    }

    Ok(args)
}

fn seconds_arg(name: &str, seconds: f64) -> anyhow::Result<Duration> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(anyhow::anyhow!("Bad value for {}: {} (must be positive)", name, seconds));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| anyhow::anyhow!("Bad value for {}: {}", name, e))
}
