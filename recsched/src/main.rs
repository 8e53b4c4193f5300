//! recsched: manage the reservation database of the recording scheduler.
//!
//! The scheduler itself runs inside the host application; this tool edits
//! and inspects what it will record.

use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use log::{error, info};

use recsched::config::{load_config, locate_config, ConfigFile};
use recsched::database::Database;
use recsched::logging;
use recsched::recording::{naming, HookKind, RecordingInfo};
use recsched::store::ReservationStore;
use recsched_model::{EventKey, PostStopAction, Reservation, ServiceKey};

/// recsched - reservation database tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Path to the database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List reservations in store order
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Add or replace a reservation
    Add {
        #[arg(long)]
        nid: u16,
        #[arg(long)]
        tsid: u16,
        #[arg(long)]
        sid: u16,
        #[arg(long)]
        eid: u16,
        /// Start time, "YYYY-MM-DD HH:MM:SS"
        #[arg(long, value_parser = parse_time)]
        start: NaiveDateTime,
        /// Duration in seconds
        #[arg(long)]
        duration: u32,
        #[arg(long)]
        name: String,
        /// Tune only, do not record
        #[arg(long)]
        view_only: bool,
        /// Action after the recording, e.g. "Close" or "SettleSuspend"
        #[arg(long, value_parser = parse_post_stop)]
        on_stopped: Option<PostStopAction>,
        /// Store disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Delete a reservation
    Delete {
        #[arg(long)]
        nid: u16,
        #[arg(long)]
        tsid: u16,
        #[arg(long)]
        sid: u16,
        #[arg(long)]
        eid: u16,
    },
    /// List search queries
    Queries {
        #[arg(long)]
        json: bool,
    },
    /// Show the reservation the scheduler would act on next
    Nearest {
        /// Evaluate at this time instead of now
        #[arg(long, value_parser = parse_time)]
        at: Option<NaiveDateTime>,
    },
    /// Print the environment a recording hook would get for a reservation
    Hook {
        #[arg(long)]
        nid: u16,
        #[arg(long)]
        tsid: u16,
        #[arg(long)]
        sid: u16,
        #[arg(long)]
        eid: u16,
        /// Show the end-of-recording hook instead of the start hook
        #[arg(long)]
        end: bool,
    },
    /// Print the normalized configuration
    Config,
}

fn parse_time(text: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| format!("{}: {}", text, e))
}

fn parse_post_stop(text: &str) -> Result<PostStopAction, String> {
    (0u8..=7)
        .filter_map(|code| PostStopAction::try_from(code).ok())
        .find(|action| format!("{:?}", action).eq_ignore_ascii_case(text))
        .ok_or_else(|| format!("unknown action: {}", text))
}

fn print_reservation(index: usize, res: &Reservation) {
    let key = &res.key;
    println!(
        "{:3} {} NID=0x{:04X} TSID=0x{:04X} SID={:5} EID=0x{:04X} {} {:5}s {:?} {}",
        index,
        if res.enabled { "on " } else { "off" },
        key.service.network_id,
        key.service.transport_stream_id,
        key.service.service_id,
        key.event_id,
        res.start.format("%Y-%m-%d %H:%M:%S"),
        res.duration,
        res.follow_mode,
        res.name
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match locate_config(args.config.as_deref()) {
        Some(path) => match load_config(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config file {}: {}", path.display(), e);
                return Err(e.into());
            }
        },
        None => ConfigFile::default(),
    };

    // Command line takes precedence over the config file.
    let log_dir = args
        .log_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs")));
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(7);
    logging::init_logging(&log_dir, log_retention_days, args.verbose, file_config.logging.level.as_deref())
        .expect("Failed to initialize logging");

    let config = file_config.scheduler_config();
    let db_path = args
        .database
        .clone()
        .or_else(|| file_config.database.path.as_ref().map(PathBuf::from))
        .unwrap_or_else(Database::default_path);

    info!("Opening database: {:?}", db_path);
    let mut db = match Database::open(&db_path) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    let mut store = ReservationStore::new(config.defaults.clone());
    store.replace_all(db.get_reservations()?);

    match args.command {
        Command::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&store.to_vec())?);
            } else {
                for (index, res) in store.iter().enumerate() {
                    print_reservation(index, res);
                }
            }
        }
        Command::Add {
            nid,
            tsid,
            sid,
            eid,
            start,
            duration,
            name,
            view_only,
            on_stopped,
            disabled,
        } => {
            let mut res = Reservation::new(EventKey::new(ServiceKey::new(nid, tsid, sid), eid), start, duration, name);
            res.enabled = !disabled;
            if view_only {
                res.option.view_only = Some(true);
            }
            res.option.on_stopped = on_stopped;
            if store.upsert(res) {
                db.replace_reservations(&store.to_vec())?;
                info!("Reservation saved ({} total)", store.len());
            } else {
                info!("Reservation unchanged");
            }
        }
        Command::Delete { nid, tsid, sid, eid } => {
            let key = EventKey::new(ServiceKey::new(nid, tsid, sid), eid);
            match store.delete(&key) {
                Some(removed) => {
                    db.replace_reservations(&store.to_vec())?;
                    info!("Deleted \"{}\"", removed.name);
                }
                None => {
                    error!("No reservation for {}", key);
                    return Err(format!("no reservation for {}", key).into());
                }
            }
        }
        Command::Queries { json } => {
            let queries = db.get_queries()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&queries)?);
            } else {
                for (index, query) in queries.iter().enumerate() {
                    println!(
                        "{:3} {} {} days={} window={}+{}s genre={}/{} keyword={:?}",
                        index,
                        if query.enabled { "on " } else { "off" },
                        query.service,
                        query.weekdays,
                        query.window_start,
                        query.window_duration,
                        query.genre.level1,
                        query.genre.level2,
                        query.keyword
                    );
                }
            }
        }
        Command::Nearest { at } => {
            let now = at.unwrap_or_else(|| Local::now().naive_local());
            match store.nearest(now, true) {
                Some(res) => {
                    let offset = res.trimmed_start(store.defaults()) - now;
                    print_reservation(store.position(&res.key).unwrap_or_default(), res);
                    println!("starts in {}s", offset.num_seconds());
                }
                None => println!("no upcoming reservation"),
            }
        }
        Command::Hook { nid, tsid, sid, eid, end } => {
            let key = EventKey::new(ServiceKey::new(nid, tsid, sid), eid);
            let res = match store.get(&key) {
                Some(res) => res.clone(),
                None => {
                    error!("No reservation for {}", key);
                    return Err(format!("no reservation for {}", key).into());
                }
            };
            let option = res.resolved(store.defaults());
            let mut hook = RecordingInfo::new(res, option);
            if !hook.option.view_only {
                let name = naming::recording_file_name(
                    &hook.option.save_name,
                    key.event_id,
                    hook.reservation.start,
                    &hook.reservation.name,
                    &config.event_name_translate,
                    &config.event_name_remove,
                );
                hook.file_path = Some(hook.option.save_dir.join(name));
            }
            let kind = if end { HookKind::EndRec } else { HookKind::StartRec };
            for (name, value) in hook.env_vars(kind) {
                println!("{}={}", name, value);
            }
        }
        Command::Config => {
            println!("{:#?}", config);
        }
    }

    Ok(())
}
