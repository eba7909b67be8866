#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]

use std::{error::Error, sync::Arc};

use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use roosty_alarmd::{
    AlarmBuilder, AlarmEdit, AlarmStore, Config, Engine, LogNotifier, SystemClock,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// write a default config file
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// add an alarm, AT is RFC 3339 or HH:MM (the next time it comes around)
    Add {
        label: String,
        #[clap(value_parser = parse_when)]
        at: DateTime<Utc>,
        /// repeat interval like 90s, 15m, 2h or 1d
        #[clap(long, value_parser = parse_interval)]
        every: Option<Duration>,
        #[clap(long)]
        sound: Option<String>,
        #[clap(long)]
        no_vibrate: bool,
        /// snooze length in minutes, 0 turns snoozing off
        #[clap(long)]
        snooze: Option<u32>,
    },
    Edit {
        id: String,
        #[clap(long)]
        label: Option<String>,
        #[clap(long, value_parser = parse_when)]
        at: Option<DateTime<Utc>>,
        #[clap(long, value_parser = parse_interval, conflicts_with = "once")]
        every: Option<Duration>,
        /// stop repeating
        #[clap(long)]
        once: bool,
        #[clap(long)]
        sound: Option<String>,
        #[clap(long, action = ArgAction::Set)]
        vibrate: Option<bool>,
        /// snooze length in minutes, 0 turns snoozing off
        #[clap(long)]
        snooze: Option<u32>,
    },
    Enable {
        id: String,
    },
    Disable {
        id: String,
    },
    Remove {
        id: String,
    },
    List,
    /// recover stored alarms and fire them until interrupted (the default)
    Run,
}

fn main() -> Result<(), Box<dyn Error>> {
    // initilize the logger
    simple_file_logger::init_logger!("roosty_alarmd").expect("couldn't initialize logger");

    let args = Args::parse();
    match args.command.unwrap_or(Command::Run) {
        Command::Init { force } => init(force)?,
        Command::Add {
            label,
            at,
            every,
            sound,
            no_vibrate,
            snooze,
        } => {
            let mut alarm = AlarmBuilder::new(label)
                .fire_at(at)
                .vibrate(!no_vibrate);
            if let Some(every) = every {
                alarm = alarm.repeat_every(every);
            }
            if let Some(sound) = sound {
                alarm = alarm.sound(sound);
            }
            if let Some(snooze) = snooze {
                alarm = alarm.snooze_minutes(snooze_minutes(snooze));
            }
            println!("added {}", open_engine()?.service().create(alarm)?);
        }
        Command::Edit {
            id,
            label,
            at,
            every,
            once,
            sound,
            vibrate,
            snooze,
        } => {
            let mut edits = vec![];
            edits.extend(label.map(AlarmEdit::Label));
            edits.extend(at.map(AlarmEdit::FireAt));
            edits.extend(every.map(|every| AlarmEdit::Repeat(Some(every))));
            if once {
                edits.push(AlarmEdit::Repeat(None));
            }
            edits.extend(sound.map(AlarmEdit::Sound));
            edits.extend(vibrate.map(AlarmEdit::Vibrate));
            edits.extend(snooze.map(|snooze| AlarmEdit::Snooze(snooze_minutes(snooze))));
            println!("updated {}", open_engine()?.service().update(&id, edits)?);
        }
        Command::Enable { id } => {
            println!("enabled {}", open_engine()?.service().set_enabled(&id, true)?);
        }
        Command::Disable { id } => {
            println!("disabled {}", open_engine()?.service().set_enabled(&id, false)?);
        }
        Command::Remove { id } => println!("removed {}", open_engine()?.service().delete(&id)?),
        Command::List => {
            for alarm in open_engine()?.service().list()? {
                println!("{alarm}");
            }
        }
        Command::Run => run(open_engine()?)?,
    }
    Ok(())
}

fn init(force: bool) -> Result<(), Box<dyn Error>> {
    let path = Config::config_path()?;
    if force || !path.exists() {
        Config::new().save(path.clone())?;
        println!("wrote {}", path.display());
    } else {
        println!("{} already exists, use --force to overwrite", path.display());
    }
    Ok(())
}

fn open_engine() -> Result<Arc<Engine>, Box<dyn Error>> {
    let config = Config::load_or_default(Config::config_path()?)?;
    let store = Arc::new(AlarmStore::open(config.store_path()?)?);
    Ok(Arc::new(Engine::new(
        &config,
        store,
        Arc::new(SystemClock),
        Arc::new(LogNotifier),
    )))
}

fn run(engine: Arc<Engine>) -> Result<(), Box<dyn Error>> {
    let report = engine.recover()?;
    println!(
        "rescheduled {} alarms ({} overdue)",
        report.armed, report.overdue
    );
    let handle = engine.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal...");
        handle.stop();
    })?;
    engine.run();
    Ok(())
}

const fn snooze_minutes(minutes: u32) -> Option<u32> {
    if minutes == 0 {
        None
    } else {
        Some(minutes)
    }
}

/// RFC 3339, or `HH:MM` meaning the next time the local clock shows it
fn parse_when(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    let time = NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| format!("{s:?} is neither RFC 3339 nor HH:MM"))?;
    let now = Local::now();
    let mut date = now.date_naive();
    loop {
        // skips days where the time doesn't exist locally (DST gaps)
        if let Some(at) = date.and_time(time).and_local_timezone(Local).earliest() {
            if at > now {
                return Ok(at.with_timezone(&Utc));
            }
        }
        date = date
            .succ_opt()
            .ok_or_else(|| format!("no date after {date}"))?;
    }
}

/// `<number><unit>` with unit one of s, m, h, d; a bare number is seconds
fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (number, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c),
        _ => (s, 's'),
    };
    let n: i64 = number
        .parse()
        .map_err(|_| format!("{s:?} is not an interval like 90s, 15m, 2h or 1d"))?;
    let interval = match unit {
        's' => Duration::try_seconds(n),
        'm' => Duration::try_minutes(n),
        'h' => Duration::try_hours(n),
        'd' => Duration::try_days(n),
        _ => return Err(format!("unknown unit {unit:?}, use s, m, h or d")),
    };
    interval.ok_or_else(|| format!("{s:?} is too long"))
}
