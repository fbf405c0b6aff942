// modemctl -- command line tool for exercising modemlib plugins against
// real modems or a mock transport.
//
// Usage:
//   modemctl --vendor mtk --port /dev/ttyUSB2 info
//   modemctl --vendor novatel --port /dev/ttyUSB0 --secondary /dev/ttyUSB1 enable
//   modemctl --vendor generic --port /dev/ttyACM0 unlock 1234
//   modemctl --vendor mtk --port /dev/ttyUSB2 modes set 2g|3g --preferred 3g
//   modemctl --vendor generic --port /dev/ttyACM0 connect --apn internet
//   modemctl --vendor anydata --port /dev/ttyUSB0 --config modem.toml monitor --duration 60
//   modemctl list

mod logging;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use modemlib::{
    BearerProperties, ModeCombination, Modem, ModemBuilder, ModemConfig, ModemLock, ModemMode,
    ModemOps, PowerState,
};
use modemlib_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// modemctl -- drives a cellular modem from the command line.
#[derive(Debug, Parser)]
#[command(name = "modemctl", version, about)]
struct Cli {
    /// Plugin: generic, mtk, anydata, novatel.
    #[arg(long, default_value = "generic")]
    vendor: String,

    /// Primary AT port (e.g. /dev/ttyUSB2). Required unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Secondary AT port, used for control traffic while the primary
    /// carries a data session.
    #[arg(long)]
    secondary: Option<String>,

    /// Override the vendor's default baud rate.
    #[arg(long)]
    baud: Option<u32>,

    /// TOML file with per-modem overrides (timeouts, grace periods, ...).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use a mock transport instead of a real serial port.
    /// Useful for verifying CLI parsing and builder wiring without hardware.
    #[arg(long)]
    mock: bool,

    /// Log filter, e.g. `debug` or `modemlib_at=trace`. Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the compiled-in plugins.
    List,

    /// Print the plugin profile and resolved configuration.
    Info,

    /// Check the SIM, power up, and report the network state.
    Enable,

    /// Power the radio down to low power.
    Disable,

    /// Set the radio power state.
    Power {
        #[arg(value_enum)]
        state: PowerArg,
    },

    /// Unlock the SIM with a PIN, or with a PUK and a new PIN.
    Unlock {
        /// PIN, or PUK when --new-pin is given.
        code: String,

        /// New PIN to set after a PUK unlock.
        #[arg(long)]
        new_pin: Option<String>,
    },

    /// Show the remaining unlock attempts.
    Retries,

    /// Show the signal quality.
    Signal,

    /// Show the registration state.
    Registration,

    /// Allowed and preferred network modes.
    Modes {
        #[command(subcommand)]
        action: ModesAction,
    },

    /// Dial a data bearer.
    Connect {
        /// Access point name (3GPP only).
        #[arg(long)]
        apn: Option<String>,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        password: Option<String>,

        /// Allow connecting while roaming.
        #[arg(long)]
        allow_roaming: bool,

        /// Seconds to hold the connection before hanging up; 0 hangs up
        /// right away.
        #[arg(long, default_value = "0")]
        hold: u64,
    },

    /// Print modem events as they arrive.
    Monitor {
        /// Duration in seconds (0 = until Ctrl-C).
        #[arg(long, default_value = "0")]
        duration: u64,
    },
}

#[derive(Debug, Subcommand)]
enum ModesAction {
    /// Show the supported and current modes.
    Get,

    /// Select the allowed modes, e.g. `2g|3g`.
    Set {
        allowed: ModemMode,

        /// Preferred mode among the allowed ones.
        #[arg(long, default_value = "none")]
        preferred: ModemMode,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PowerArg {
    On,
    Low,
    Off,
}

impl From<PowerArg> for PowerState {
    fn from(arg: PowerArg) -> Self {
        match arg {
            PowerArg::On => PowerState::On,
            PowerArg::Low => PowerState::Low,
            PowerArg::Off => PowerState::Off,
        }
    }
}

// ---------------------------------------------------------------------------
// Modem construction
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<ModemConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid modem config in {}", path.display()))
}

fn builder_from_cli(cli: &Cli) -> Result<ModemBuilder> {
    let Some(plugin) = modemlib::plugin_by_name(&cli.vendor) else {
        bail!(
            "unknown vendor '{}' (expected one of: {})",
            cli.vendor,
            modemlib::plugin_names().join(", ")
        );
    };

    let mut builder = ModemBuilder::new(plugin);
    if let Some(path) = &cli.config {
        builder = builder.config(load_config(path)?);
    }
    if let Some(baud) = cli.baud {
        builder = builder.baud_rate(baud);
    }
    if let Some(port) = &cli.port {
        builder = builder.primary_port(port);
    }
    if let Some(port) = &cli.secondary {
        builder = builder.secondary_port(port);
    }
    Ok(builder)
}

async fn create_modem(cli: &Cli) -> Result<Modem> {
    let builder = builder_from_cli(cli)?;

    if cli.mock {
        let secondary = cli
            .secondary
            .is_some()
            .then(|| Box::new(MockTransport::new()) as Box<dyn modemlib::Transport>);
        let modem = builder
            .build_with_transports(Box::new(MockTransport::new()), secondary)
            .await
            .context("failed to build modem with mock transport")?;
        println!("Connected (mock transport) -- {}", modem.plugin());
        return Ok(modem);
    }

    let port = cli
        .port
        .as_deref()
        .context("--port is required when not using --mock")?;
    let modem = builder
        .build()
        .await
        .with_context(|| format!("failed to open modem on {port}"))?;
    println!("Connected to {port} -- {}", modem.plugin());
    Ok(modem)
}

/// Check the SIM; commands that need the radio bail out on a locked SIM.
async fn initialize(modem: &Modem) -> Result<ModemLock> {
    let lock = modem.initialize().await.context("initialization failed")?;
    debug!(%lock, "SIM checked");
    Ok(lock)
}

async fn initialize_and_enable(modem: &Modem) -> Result<()> {
    let lock = initialize(modem).await?;
    if lock != ModemLock::None && lock != ModemLock::Unknown {
        bail!("SIM is locked ({lock}); run `unlock` first");
    }
    modem.enable().await.context("enabling failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_list() -> Result<()> {
    println!("{:<10} {:<14} {:<18} {:>8}  Families", "Name", "Profile", "Manufacturer", "Baud");
    for (name, profile) in modemlib::plugin_names()
        .into_iter()
        .zip(modemlib::supported_vendors())
    {
        let caps = profile.capabilities;
        let families: Vec<&str> = [(caps.gsm_umts, "GSM/UMTS"), (caps.cdma, "CDMA"), (caps.lte, "LTE")]
            .into_iter()
            .filter_map(|(on, label)| on.then_some(label))
            .collect();
        println!(
            "{:<10} {:<14} {:<18} {:>8}  {}",
            name,
            profile.name,
            profile.manufacturer,
            profile.default_baud_rate,
            families.join(", ")
        );
    }
    Ok(())
}

fn cmd_info(modem: &Modem) -> Result<()> {
    let generic = modem.ops().generic();
    let profile = generic.profile();
    let config = generic.config();
    let caps = generic.capabilities();

    println!("Modem Information");
    println!("  Plugin:         {}", profile.name);
    println!("  Manufacturer:   {}", profile.manufacturer);
    println!(
        "  Ports:          {}",
        generic.ports().map(|p| p.name()).collect::<Vec<_>>().join(", ")
    );
    println!("  State:          {}", modem.state());
    println!();
    println!("Capabilities");
    println!("  GSM/UMTS:       {}", caps.gsm_umts);
    println!("  CDMA:           {}", caps.cdma);
    println!("  LTE:            {}", caps.lte);
    println!();
    println!("Configuration");
    println!("  Baud rate:      {}", config.baud_rate);
    println!("  Flow control:   {:?}", config.flow_control);
    println!("  Cmd timeout:    {:?}", config.command_timeout);
    println!("  Unlock grace:   {:?}", config.post_unlock_grace);
    println!("  Power settle:   {:?}", config.power_up_settle);
    println!("  Max timeouts:   {}", config.max_consecutive_timeouts);
    println!(
        "  Unlock checks:  {} x {:?}",
        config.unlock_check_attempts, config.unlock_check_delay
    );
    Ok(())
}

async fn cmd_enable(modem: &Modem) -> Result<()> {
    initialize_and_enable(modem).await?;
    print_status(modem);
    Ok(())
}

async fn cmd_disable(modem: &Modem) -> Result<()> {
    initialize(modem).await?;
    modem
        .set_power_state(PowerState::Low)
        .await
        .context("failed to power down")?;
    println!("Radio powered down ({})", modem.status().power);
    Ok(())
}

async fn cmd_power(modem: &Modem, state: PowerState) -> Result<()> {
    initialize(modem).await?;
    modem
        .set_power_state(state)
        .await
        .with_context(|| format!("failed to set power {state}"))?;
    println!("Power: {state}");
    Ok(())
}

async fn cmd_unlock(modem: &Modem, code: &str, new_pin: Option<&str>) -> Result<()> {
    let lock = initialize(modem).await?;
    if lock == ModemLock::None {
        println!("SIM already unlocked");
        return Ok(());
    }

    let result = match new_pin {
        Some(pin) => modem.send_puk(code, pin).await,
        None => modem.send_pin(code).await,
    };
    match result {
        Ok(lock) => {
            println!("SIM lock: {lock}");
            Ok(())
        }
        Err(e) => {
            println!("Remaining attempts: {}", modem.status().unlock_retries);
            Err(e).context("unlock failed")
        }
    }
}

async fn cmd_retries(modem: &Modem) -> Result<()> {
    initialize(modem).await?;
    let retries = modem.unlock_retries().await.context("failed to load retries")?;
    if retries.is_empty() {
        println!("No unlock counters reported");
    }
    for (lock, count) in retries.iter() {
        println!("  {:<10} {count}", lock.to_string());
    }
    Ok(())
}

async fn cmd_signal(modem: &Modem) -> Result<()> {
    initialize_and_enable(modem).await?;
    let percent = modem.refresh_signal_quality().await?;
    println!("Signal quality: {percent}%");
    Ok(())
}

async fn cmd_registration(modem: &Modem) -> Result<()> {
    initialize_and_enable(modem).await?;
    print_status(modem);
    Ok(())
}

async fn cmd_modes_get(modem: &Modem) -> Result<()> {
    initialize(modem).await?;
    println!("Supported:");
    for modes in modem.supported_modes().await? {
        println!("  {modes}");
    }
    match modem.current_modes().await {
        Ok(current) => println!("Current: {current}"),
        Err(e) if e.is_unsupported() => println!("Current: not reported"),
        Err(e) => return Err(e).context("failed to load current modes"),
    }
    Ok(())
}

async fn cmd_modes_set(modem: &Modem, allowed: ModemMode, preferred: ModemMode) -> Result<()> {
    initialize(modem).await?;
    let modes = ModeCombination::new(allowed, preferred);
    modem
        .set_current_modes(modes)
        .await
        .with_context(|| format!("failed to set modes {modes}"))?;
    println!("Modes set: {modes}");
    Ok(())
}

async fn cmd_connect(modem: &Modem, properties: BearerProperties, hold_secs: u64) -> Result<()> {
    initialize_and_enable(modem).await?;

    let bearer = modem.create_bearer(properties);
    bearer.connect().await.context("connection failed")?;
    println!(
        "Bearer {} connected on {}",
        bearer.id(),
        bearer.data_port().unwrap_or_default()
    );
    if let Some(ip) = bearer.ipv4_config() {
        println!("  IPv4 method:    {:?}", ip.method);
    }

    if hold_secs > 0 {
        println!("Holding for {hold_secs}s (Ctrl-C to hang up)...");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(hold_secs)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    bearer.disconnect().await.context("disconnect failed")?;
    let stats = bearer.stats();
    println!("Disconnected after {:?} ({} attempts)", stats.duration, stats.attempts);
    Ok(())
}

async fn cmd_monitor(modem: &Modem, duration_secs: u64) -> Result<()> {
    let mut event_rx = modem.subscribe();
    initialize_and_enable(modem).await?;

    println!("Monitoring modem events (Ctrl-C to stop)...");

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = tokio::time::timeout(timeout, event_rx.recv()) => match received {
                Ok(Ok(event)) => println!("[event] {event:?}"),
                Ok(Err(RecvError::Lagged(n))) => {
                    println!("[warning] missed {n} events (consumer too slow)");
                }
                Ok(Err(RecvError::Closed)) => {
                    println!("Event channel closed.");
                    break;
                }
                Err(_) => {
                    if deadline.is_some() {
                        println!("Monitor duration elapsed.");
                        break;
                    }
                }
            },
        }
    }

    Ok(())
}

fn print_status(modem: &Modem) {
    let status = modem.status();
    println!("Modem Status");
    println!("  State:          {}", status.state);
    println!("  Power:          {}", status.power);
    println!("  Access tech:    {}", status.access_tech);
    println!("  Signal:         {}%", status.signal_quality);
    println!("  CS:             {}", status.registration_cs);
    println!("  PS:             {}", status.registration_ps);
    println!("  CDMA 1x:        {}", status.cdma1x);
    println!("  EVDO:           {}", status.evdo);
    println!("  LAC / cell:     {:04X} / {:X}", status.lac, status.cell_id);
    println!("  Roaming:        {}", status.is_roaming());
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

async fn run(cli: &Cli, modem: &Modem) -> Result<()> {
    match &cli.command {
        Command::List => cmd_list(),
        Command::Info => cmd_info(modem),
        Command::Enable => cmd_enable(modem).await,
        Command::Disable => cmd_disable(modem).await,
        Command::Power { state } => cmd_power(modem, (*state).into()).await,
        Command::Unlock { code, new_pin } => cmd_unlock(modem, code, new_pin.as_deref()).await,
        Command::Retries => cmd_retries(modem).await,
        Command::Signal => cmd_signal(modem).await,
        Command::Registration => cmd_registration(modem).await,
        Command::Modes { action } => match action {
            ModesAction::Get => cmd_modes_get(modem).await,
            ModesAction::Set { allowed, preferred } => {
                cmd_modes_set(modem, *allowed, *preferred).await
            }
        },
        Command::Connect {
            apn,
            user,
            password,
            allow_roaming,
            hold,
        } => {
            let properties = BearerProperties {
                apn: apn.clone(),
                user: user.clone(),
                password: password.clone(),
                allow_roaming: *allow_roaming,
                ..Default::default()
            };
            cmd_connect(modem, properties, *hold).await
        }
        Command::Monitor { duration } => cmd_monitor(modem, *duration).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref()).context("failed to initialize logging")?;

    // The `list` command does not require a modem.
    if matches!(cli.command, Command::List) {
        return cmd_list();
    }

    let modem = create_modem(&cli).await?;
    let result = run(&cli, &modem).await;
    if let Err(e) = modem.shutdown().await {
        debug!(error = %e, "shutdown failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("modemctl").chain(args.iter().copied())).unwrap()
    }

    // ===============================================================
    // Argument parsing
    // ===============================================================

    #[test]
    fn vendor_defaults_to_generic() {
        let cli = parse(&["--mock", "info"]);
        assert_eq!(cli.vendor, "generic");
        assert!(cli.mock);
        assert!(matches!(cli.command, Command::Info));
    }

    #[test]
    fn modes_set_parses_mode_lists() {
        let cli = parse(&["--vendor", "mtk", "modes", "set", "2g|3g", "--preferred", "3g"]);
        match cli.command {
            Command::Modes {
                action: ModesAction::Set { allowed, preferred },
            } => {
                assert_eq!(allowed, ModemMode::MODE_2G | ModemMode::MODE_3G);
                assert_eq!(preferred, ModemMode::MODE_3G);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_mode_is_rejected() {
        let result = Cli::try_parse_from(["modemctl", "modes", "set", "5g"]);
        assert!(result.is_err());
    }

    #[test]
    fn power_and_unlock_arguments() {
        let cli = parse(&["power", "low"]);
        assert!(matches!(cli.command, Command::Power { state: PowerArg::Low }));

        let cli = parse(&["unlock", "12345678", "--new-pin", "0000"]);
        match cli.command {
            Command::Unlock { code, new_pin } => {
                assert_eq!(code, "12345678");
                assert_eq!(new_pin.as_deref(), Some("0000"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // ===============================================================
    // Configuration
    // ===============================================================

    #[test]
    fn config_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "command_timeout_ms = 1500\nunlock_check_attempts = 2").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.command_timeout_ms, Some(1500));
        assert_eq!(config.unlock_check_attempts, Some(2));
    }

    #[test]
    fn unknown_config_keys_fail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "baud = 9600").unwrap();

        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn unknown_vendor_fails() {
        let cli = parse(&["--vendor", "acme", "info"]);
        assert!(builder_from_cli(&cli).is_err());
    }

    #[tokio::test]
    async fn mock_modem_reports_profile() {
        let cli = parse(&["--vendor", "novatel", "--mock", "--baud", "9600", "info"]);
        let modem = create_modem(&cli).await.unwrap();
        assert_eq!(modem.plugin(), "Novatel LTE");
        assert_eq!(modem.ops().generic().config().baud_rate, 9600);
        cmd_info(&modem).unwrap();
    }

    #[tokio::test]
    async fn list_runs_with_a_modem_too() {
        let cli = parse(&["--mock", "list"]);
        let modem = create_modem(&cli).await.unwrap();
        run(&cli, &modem).await.unwrap();
    }
}
