//! Curfew simulation driver
//!
//! Walks a parolee in a straight line north from a confinement location,
//! posting one movement per step to a running curfew-watch server.
//! Optionally sets a curfew first and long-polls for the resulting violation.
//!
//! Usage:
//!   cargo run --bin curfew-sim -- --set-curfew --watch
//!   cargo run --bin curfew-sim -- --parolee 7 --steps 20 --step-meters 10 --at 2021-08-15T22:00:00

use chrono::{Local, NaiveDateTime, NaiveTime};
use clap::Parser;
use curfew_watch::domain::geo::EARTH_RADIUS_METERS;
use curfew_watch::domain::{
    distance_meters, Curfew, GeoPosition, Movement, SubjectId, ViolationEvent,
};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "curfew-sim")]
#[command(about = "Walk a parolee away from home and report what the server says")]
struct Args {
    /// Base URL of the curfew-watch server
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,

    #[arg(long, default_value = "1")]
    parolee: i64,

    /// Confinement latitude (start of the walk)
    #[arg(long, default_value = "-36.8656", allow_hyphen_values = true)]
    lat: f64,

    /// Confinement longitude (start of the walk)
    #[arg(long, default_value = "174.8595", allow_hyphen_values = true)]
    lon: f64,

    #[arg(long, default_value = "10")]
    steps: u32,

    #[arg(long, default_value = "20")]
    step_meters: f64,

    /// Delay between posted movements
    #[arg(long, default_value = "500")]
    interval_ms: u64,

    /// Timestamp of the first movement (default: now, local time)
    #[arg(long)]
    at: Option<NaiveDateTime>,

    /// Set the curfew below before walking
    #[arg(long)]
    set_curfew: bool,

    #[arg(long, default_value = "20:00:00")]
    curfew_start: NaiveTime,

    #[arg(long, default_value = "06:30:00")]
    curfew_end: NaiveTime,

    #[arg(long, default_value = "50")]
    radius: f64,

    /// Long-poll for a violation while walking
    #[arg(long)]
    watch: bool,
}

/// Position `meters` due north of `origin`
fn north_of(origin: GeoPosition, meters: f64) -> GeoPosition {
    let delta_lat = (meters / EARTH_RADIUS_METERS).to_degrees();
    GeoPosition::new(origin.latitude + delta_lat, origin.longitude)
}

async fn watch_violation(client: reqwest::Client, url: String) {
    match client.get(&url).send().await {
        Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
            match resp.json::<ViolationEvent>().await {
                Ok(event) => {
                    println!("!! VIOLATION parolee={} at {}", event.subject_id, event.location)
                }
                Err(e) => println!("!! violation body unreadable: {e}"),
            }
        }
        Ok(resp) => println!("!! violation poll ended: {}", resp.status()),
        Err(e) => println!("!! violation poll error: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let subject = SubjectId(args.parolee);
    let base = args.url.trim_end_matches('/');
    let home = GeoPosition::new(args.lat, args.lon);

    if !home.is_valid() {
        return Err(format!("invalid start position {home}").into());
    }

    if args.set_curfew {
        let curfew = Curfew::new(args.curfew_start, args.curfew_end, home, args.radius);
        let resp =
            client.put(format!("{base}/parolees/{subject}/curfew")).json(&curfew).send().await?;
        println!(
            "curfew {}-{} r={}m at {} -> {}",
            args.curfew_start,
            args.curfew_end,
            args.radius,
            home,
            resp.status()
        );
    }

    let watcher = args.watch.then(|| {
        let url = format!("{base}/parolees/{subject}/violations");
        tokio::spawn(watch_violation(client.clone(), url))
    });

    let start = args.at.unwrap_or_else(|| Local::now().naive_local());
    let interval = Duration::from_millis(args.interval_ms);

    for step in 0..=args.steps {
        let position = north_of(home, args.step_meters * f64::from(step));
        let offset_ms = args.interval_ms as i64 * i64::from(step);
        let timestamp = start + chrono::Duration::milliseconds(offset_ms);
        let movement = Movement::new(timestamp, position);

        let status = match client
            .post(format!("{base}/parolees/{subject}/movements"))
            .json(&movement)
            .send()
            .await
        {
            Ok(resp) => resp.status().to_string(),
            Err(e) => format!("error: {e}"),
        };
        println!(
            "step {step:>3} {timestamp} {position} ({:.1} m from home) -> {status}",
            distance_meters(&home, &position)
        );

        if step < args.steps {
            tokio::time::sleep(interval).await;
        }
    }

    if let Some(watcher) = watcher {
        match tokio::time::timeout(Duration::from_secs(2), watcher).await {
            Ok(_) => {}
            Err(_) => println!("no violation reported"),
        }
    }

    Ok(())
}
