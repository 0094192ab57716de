// ===============================
// src/main.rs
// ===============================
/*
 # contoh pemakaian (testnet default, isi .env dulu)
 fapi-trader time
 fapi-trader ping
 fapi-trader account --simple
 fapi-trader open BTCUSDT --side buy --type MARKET --quantity 0.01 --leverage 10
 fapi-trader tpsl BTCUSDT --tp 65000 --sl 58000 --quantity 0.01
 fapi-trader stream BTCUSDT --record data/ticks.jsonl

 # metrics
 METRICS_PORT=9898 fapi-trader stream BTCUSDT
 curl -s localhost:9898/metrics | grep '^price_ticks_total'
*/
/*
=============================================================================
Project : fapi_trader — Binance USDⓈ-M futures trading client in Rust
Module  : main.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
License : MIT (see LICENSE)
=============================================================================
*/
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use fapi_trader::account::to_simplified;
use fapi_trader::config::{self, Network, Settings};
use fapi_trader::credentials::{ApiProfile, CredentialsProvider, SharedCredentials};
use fapi_trader::error::ClientResult;
use fapi_trader::models::{OrderRequest, OrderSide, OrderType, PositionSide};
use fapi_trader::orders::{OpenPositionRequest, Orchestrator, TpSlLeg, TpSlRequest};
use fapi_trader::rest::{ConnectionReport, RestClient};
use fapi_trader::stream::{PriceStream, PriceTick};
use fapi_trader::symbols::SymbolCache;
use fapi_trader::{metrics, recorder};

#[derive(Parser, Debug)]
#[command(name = "fapi-trader", version, about = "Binance USDⓈ-M futures client")]
struct Cli {
    /// Use production hosts (overrides BINANCE_USE_TESTNET)
    #[arg(long, global = true)]
    mainnet: bool,

    /// Sign with the read-only key set
    #[arg(long, global = true)]
    read_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Side {
    Buy,
    Sell,
}

impl From<Side> for OrderSide {
    fn from(s: Side) -> Self {
        match s {
            Side::Buy => OrderSide::Buy,
            Side::Sell => OrderSide::Sell,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Server time and local clock offset
    Time,
    /// Time call + signed account call
    Ping,
    /// Trading symbols with precision
    Symbols,
    /// Mark price, funding and 24h change
    MarkPrice { symbol: String },
    Klines {
        symbol: String,
        #[arg(long, default_value = "1h")]
        interval: String,
        #[arg(long)]
        limit: Option<u32>,
    },
    Account {
        /// Numeric view, open positions only
        #[arg(long)]
        simple: bool,
    },
    Positions,
    OpenOrders {
        #[arg(long)]
        symbol: Option<String>,
    },
    /// leverage -> margin type -> order
    Open {
        symbol: String,
        #[arg(long, value_enum)]
        side: Side,
        #[arg(long = "type", default_value = "MARKET")]
        order_type: OrderType,
        #[arg(long)]
        quantity: f64,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        stop_price: Option<f64>,
        #[arg(long, default_value_t = 10)]
        leverage: u32,
        #[arg(long)]
        isolated: bool,
        #[arg(long)]
        hedge_side: Option<String>,
    },
    /// Take-profit / stop-loss legs for an open position
    Tpsl {
        symbol: String,
        /// Position is short (legs BUY); default long (legs SELL)
        #[arg(long)]
        short: bool,
        #[arg(long)]
        tp: Option<f64>,
        #[arg(long)]
        sl: Option<f64>,
        #[arg(long)]
        quantity: f64,
    },
    CancelAll { symbol: String },
    /// Live mark price until Ctrl-C
    Stream {
        symbol: String,
        #[arg(long)]
        record: Option<String>,
        #[arg(long)]
        seconds: Option<u64>,
    },
}

fn print_json<T: serde::Serialize>(v: &T) {
    match serde_json::to_string_pretty(v) {
        Ok(s) => println!("{s}"),
        Err(e) => error!(error = %e, "serialize output"),
    }
}

fn parse_position_side(s: Option<&str>) -> Option<PositionSide> {
    match s.map(|v| v.to_ascii_uppercase()).as_deref() {
        Some("LONG") => Some(PositionSide::Long),
        Some("SHORT") => Some(PositionSide::Short),
        Some("BOTH") => Some(PositionSide::Both),
        _ => None,
    }
}

async fn run(cli: Cli, settings: Settings) -> ClientResult<()> {
    let use_testnet = settings.use_testnet && !cli.mainnet;
    let shared = SharedCredentials::new(settings.profiles.initial_credentials(use_testnet));
    if cli.read_only {
        shared.switch_profile(&settings.profiles, ApiProfile::ReadOnly);
    }
    let network = Network::from_testnet_flag(shared.current().use_testnet);
    metrics::CONFIG_NETWORK.with_label_values(&[network.as_str()]).set(1);
    info!(
        network = network.as_str(),
        rest = %settings.client.endpoints.rest_base(use_testnet),
        ws = %settings.client.endpoints.ws_base(use_testnet),
        recv_window_ms = settings.client.recv_window_ms,
        "startup config"
    );

    let credentials: Arc<dyn CredentialsProvider> = Arc::new(shared);
    let client = Arc::new(RestClient::new(settings.client.clone(), credentials.clone())?);

    match cli.command {
        Command::Time => {
            let ts = client.server_time().await?;
            println!("serverTime={ts} offset_ms={:?}", client.clock().last_offset_ms());
        }
        Command::Ping => match client.test_connection().await {
            ConnectionReport::Ok { network, server_time, wallet_balance } => {
                println!("ok network={} serverTime={server_time} wallet={wallet_balance}", network.as_str())
            }
            ConnectionReport::SignatureRejected { msg, public_ip } => {
                println!("signature rejected: {msg}\ncheck api key/secret, IP allow-list and futures permission");
                match public_ip {
                    Some(ip) => println!("public ip seen by the exchange: {ip}"),
                    None => println!("public ip: lookup failed"),
                }
            }
            ConnectionReport::AccountFailed(msg) => println!("account call failed: {msg}"),
            ConnectionReport::Unreachable(msg) => println!("exchange unreachable: {msg}"),
        },
        Command::Symbols => {
            for s in client.trading_symbols().await? {
                println!("{:<16} price_prec={} qty_prec={}", s.symbol, s.price_precision, s.quantity_precision);
            }
        }
        Command::MarkPrice { symbol } => {
            let (mark, ticker) = tokio::try_join!(client.mark_price(&symbol), client.ticker_24h(&symbol))?;
            println!(
                "{} mark={} index={} funding={} 24h={}%",
                mark.symbol, mark.mark_price, mark.index_price, mark.last_funding_rate, ticker.price_change_percent
            );
        }
        Command::Klines { symbol, interval, limit } => {
            for k in client.klines(&symbol, &interval, limit).await? {
                println!("{} o={} h={} l={} c={} v={}", k.open_time, k.open, k.high, k.low, k.close, k.volume);
            }
        }
        Command::Account { simple } => {
            let snap = client.account_info().await?;
            if simple {
                print_json(&to_simplified(&snap));
            } else {
                print_json(&snap);
            }
        }
        Command::Positions => print_json(&client.active_positions().await?),
        Command::OpenOrders { symbol } => print_json(&client.open_orders(symbol.as_deref()).await?),
        Command::Open { symbol, side, order_type, quantity, price, stop_price, leverage, isolated, hedge_side } => {
            let symbols = Arc::new(SymbolCache::new());
            if let Err(e) = symbols.load(&client).await {
                warn!(error = %e, "symbol metadata unavailable, using default precision");
            }
            let orch = Orchestrator::new(client.clone(), symbols);
            let mut order = OrderRequest::new(symbol.to_ascii_uppercase(), side.into(), order_type).quantity(quantity);
            order.price = price;
            order.stop_price = stop_price;
            order.position_side = parse_position_side(hedge_side.as_deref());
            let res = orch.open_position(OpenPositionRequest::new(order, leverage).isolated(isolated)).await?;
            print_json(&res);
        }
        Command::Tpsl { symbol, short, tp, sl, quantity } => {
            let symbols = Arc::new(SymbolCache::new());
            if let Err(e) = symbols.load(&client).await {
                warn!(error = %e, "symbol metadata unavailable, using default precision");
            }
            let orch = Orchestrator::new(client.clone(), symbols);
            let req = TpSlRequest {
                symbol: symbol.to_ascii_uppercase(),
                is_long: !short,
                position_side: None,
                take_profit: tp.map(|price| TpSlLeg { price, quantity }),
                stop_loss: sl.map(|price| TpSlLeg { price, quantity }),
            };
            let report = orch.set_tpsl(req).await?;
            for o in report.take_profit.iter().chain(report.stop_loss.iter()) {
                print_json(o);
            }
        }
        Command::CancelAll { symbol } => {
            let orch = Orchestrator::new(client.clone(), Arc::new(SymbolCache::new()));
            let ack = orch.cancel_all_orders(&symbol.to_ascii_uppercase()).await?;
            println!("{} {}", ack.code, ack.msg);
        }
        Command::Stream { symbol, record, seconds } => {
            let stream = PriceStream::new(settings.client.endpoints.clone(), credentials.clone(), settings.ws_reconnect_delay);
            stream.on_price(|sym, px| println!("{sym} {px}"));

            // ---- Recorder (optional) ----
            if let Some(path) = record.or(settings.record_file.clone()) {
                let (rec_tx, rec_rx) = mpsc::channel::<PriceTick>(8192);
                tokio::spawn(recorder::run(rec_rx, path));
                let mut ticks = stream.ticks();
                tokio::spawn(async move {
                    loop {
                        match ticks.recv().await {
                            Ok(t) => {
                                if rec_tx.send(t).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "recorder lagging"),
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
            }

            stream.subscribe(&symbol).await?;
            match seconds {
                Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
            stream.close().await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ---- Load config ----
    let settings = config::load();
    let cli = Cli::parse();

    // ---- Metrics ----
    metrics::init();
    if let Some(port) = settings.metrics_port {
        metrics::serve_metrics(port);
    }

    if let Err(e) = run(cli, settings).await {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}
