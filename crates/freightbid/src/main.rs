use std::io::Read;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use freightbid::models::{Actor, FreightConfig, Reply, ShipmentEvent, ShipmentStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "freightbid", about = "Freight marketplace shipment and bid lifecycle")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/freightbid.toml")]
    config: String,

    /// User performing the operation
    #[arg(long, global = true)]
    as_user: Option<Uuid>,

    /// Role the user acts in
    #[arg(long, global = true, value_enum, default_value_t = Role::Shipper)]
    role: Role,

    /// Read JSON input from a file instead of stdin
    #[arg(short, long, global = true)]
    input: Option<String>,

    /// Pretty-print the output JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Shipper,
    Carrier,
    System,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the shipper profile of --as-user
    RegisterShipper,
    /// Create the carrier profile of --as-user
    RegisterCarrier,
    /// Add a vehicle to the acting carrier's fleet
    RegisterVehicle { registration_number: String },
    /// Post a shipment (ShipmentDraft JSON)
    CreateShipment,
    GetShipment { id: Uuid },
    /// Edit a waiting shipment (ShipmentPatch JSON)
    UpdateShipment { id: Uuid },
    /// Apply a lifecycle event: delay, resume, deliver
    Transition { id: Uuid, event: ShipmentEvent },
    /// The acting shipper's shipments, newest first
    ListShipments {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        per_page: Option<u32>,
        #[arg(long)]
        status: Option<ShipmentStatus>,
    },
    /// Report an impediment (ImpedimentReport JSON)
    ReportImpediment { shipment_id: Uuid },
    GetImpediment { id: Uuid },
    ResolveImpediment { id: Uuid },
    /// Bid on a shipment (BidDraft JSON)
    SubmitBid { shipment_id: Uuid },
    GetBid { id: Uuid },
    ListBids { shipment_id: Uuid },
    AcceptBid { id: Uuid },
    DeleteBid { id: Uuid },
    /// The bid the scoring model ranks highest
    TopBid { shipment_id: Uuid },
    /// Accept the bid the scoring model ranks highest
    AcceptTopBid { shipment_id: Uuid },
    RateCarrier { carrier_id: Uuid, rating: f64 },
    GetCarrier { id: Uuid },
    /// Follow the model directory and hot-reload new versions until Ctrl-C
    WatchModels,
}

impl Cli {
    fn actor(&self) -> Result<Actor> {
        match (self.role, self.as_user) {
            (Role::System, _) => Ok(Actor::System),
            (Role::Shipper, Some(user)) => Ok(Actor::Shipper(user)),
            (Role::Carrier, Some(user)) => Ok(Actor::Carrier(user)),
            (_, None) => bail!("--as-user is required for the {:?} role", self.role),
        }
    }

    fn user(&self) -> Result<Uuid> {
        self.as_user.context("--as-user is required")
    }

    fn read_input<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = if let Some(input_path) = &self.input {
            std::fs::read_to_string(input_path)
                .with_context(|| format!("Failed to read input: {input_path}"))?
        } else {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            buf
        };
        serde_json::from_str(&raw).context("Failed to parse input JSON")
    }

    fn emit<T: Serialize>(&self, reply: &Reply<T>) -> Result<()> {
        let output = if self.pretty {
            serde_json::to_string_pretty(&reply.envelope)?
        } else {
            serde_json::to_string(&reply.envelope)?
        };
        println!("{output}");
        if reply.outcome.is_success() {
            Ok(())
        } else {
            bail!("{:?} ({})", reply.outcome, reply.outcome.status_code())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load config
    let config_str = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config: {}", cli.config))?;
    let config: FreightConfig =
        toml::from_str(&config_str).with_context(|| "Failed to parse config")?;

    let market = freightbid::build_marketplace(&config)
        .await
        .context("Failed to build marketplace")?;

    match &cli.command {
        Command::RegisterShipper => cli.emit(&market.register_shipper(cli.user()?)),
        Command::RegisterCarrier => cli.emit(&market.register_carrier(cli.user()?)),
        Command::RegisterVehicle {
            registration_number,
        } => cli.emit(&market.register_vehicle(cli.actor()?, registration_number)),
        Command::CreateShipment => {
            let draft = cli.read_input()?;
            cli.emit(&market.create_shipment(cli.actor()?, draft).await)
        }
        Command::GetShipment { id } => cli.emit(&market.get_shipment(cli.actor()?, *id)),
        Command::UpdateShipment { id } => {
            let patch = cli.read_input()?;
            cli.emit(&market.update_shipment(cli.actor()?, *id, patch).await)
        }
        Command::Transition { id, event } => {
            cli.emit(&market.transition_shipment(cli.actor()?, *id, *event))
        }
        Command::ListShipments {
            page,
            per_page,
            status,
        } => cli.emit(&market.list_shipments(cli.actor()?, *page, *per_page, *status)),
        Command::ReportImpediment { shipment_id } => {
            let report = cli.read_input()?;
            cli.emit(&market.report_impediment(cli.actor()?, *shipment_id, report))
        }
        Command::GetImpediment { id } => cli.emit(&market.get_impediment(cli.actor()?, *id)),
        Command::ResolveImpediment { id } => {
            cli.emit(&market.resolve_impediment(cli.actor()?, *id))
        }
        Command::SubmitBid { shipment_id } => {
            let draft = cli.read_input()?;
            cli.emit(&market.submit_bid(cli.actor()?, *shipment_id, draft))
        }
        Command::GetBid { id } => cli.emit(&market.get_bid(cli.actor()?, *id)),
        Command::ListBids { shipment_id } => {
            cli.emit(&market.list_bids(cli.actor()?, *shipment_id))
        }
        Command::AcceptBid { id } => cli.emit(&market.accept_bid(cli.actor()?, *id)),
        Command::DeleteBid { id } => cli.emit(&market.delete_bid(cli.actor()?, *id)),
        Command::TopBid { shipment_id } => {
            cli.emit(&market.top_bid(cli.actor()?, *shipment_id).await)
        }
        Command::AcceptTopBid { shipment_id } => {
            cli.emit(&market.accept_top_bid(cli.actor()?, *shipment_id).await)
        }
        Command::RateCarrier { carrier_id, rating } => {
            cli.emit(&market.rate_carrier(cli.actor()?, *carrier_id, *rating))
        }
        Command::GetCarrier { id } => cli.emit(&market.get_carrier(*id)),
        Command::WatchModels => {
            let Some((cancel, handle)) = freightbid::spawn_model_watcher(&market, &config) else {
                bail!("Model watching is disabled (watch_interval_seconds = 0 or a version is pinned)");
            };
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            cancel.cancel();
            handle.await.context("Model watcher panicked")?;
            Ok(())
        }
    }
}
