use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tandemgrid::config::Config;
use tandemgrid::engine::Engine;
use tandemgrid::grid::{DayGrid, GridChange};
use tandemgrid::model::Event;
use tandemgrid::notify::NotifyHub;
use tandemgrid::schedule::TimeSlotSchedule;
use tandemgrid::session::SessionCoordinator;

const USAGE: &str = "usage: tandemgrid [YYYY-MM-DD] [--watch]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut date = chrono::Local::now().date_naive();
    let mut watch = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--watch" => watch = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(());
            }
            other => {
                date = NaiveDate::parse_from_str(other, "%Y-%m-%d")
                    .map_err(|e| format!("{other}: {e}\n{USAGE}"))?;
            }
        }
    }

    let config = Config::from_env()?;
    tandemgrid::observability::init(config.metrics_port)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::with_schedule(
        config.wal_path(),
        notify,
        config.schedule.clone(),
    )?);
    info!("tandemgrid store opened");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  bookings: {} over {} days", engine.booking_count(), engine.day_count());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    tokio::spawn(tandemgrid::compactor::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    let coordinator = SessionCoordinator::new();
    let mut grid = DayGrid::open(engine.as_ref(), date, &coordinator).await?;
    print_day(&grid, &config.schedule);
    if !watch {
        return Ok(());
    }

    info!("watching {date}, ctrl-c to stop");
    loop {
        tokio::select! {
            change = grid.next_change(engine.as_ref()) => {
                match change? {
                    GridChange::Store(event) => info!("{}", describe(&event)),
                    GridChange::Released => info!("edit session closed"),
                }
                print_day(&grid, &config.schedule);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("stopping");
                break;
            }
        }
    }
    Ok(())
}

fn print_day(grid: &DayGrid, schedule: &TimeSlotSchedule) {
    println!("{}", grid.date());
    println!("{:>5}  {:>6}  {:>6}  {:>9}  {:>6}", "time", "pilots", "booked", "available", "female");
    for slot in grid.capacity(schedule) {
        println!(
            "{:>5}  {:>6}  {:>6}  {:>9}  {:>6}",
            slot.time, slot.pilots, slot.booked, slot.available, slot.female_available
        );
    }
    let roster = grid.roster();
    for booking in &grid.view().bookings {
        let pilots: Vec<&str> = booking
            .columns()
            .iter()
            .map(|c| roster.get(c as usize).map_or("-", |p| p.display_name.as_str()))
            .collect();
        println!(
            "  #{} {:<24} {:>2}p  {:<11} {}",
            booking.time_index,
            booking.customer_name,
            booking.number_of_people,
            booking.booking_status.as_str(),
            pilots.join(", ")
        );
    }
}

fn describe(event: &Event) -> String {
    match event {
        Event::PilotUpserted { pilot } => format!("pilot {} updated", pilot.display_name),
        Event::PilotRemoved { uid } => format!("pilot {uid} removed"),
        Event::AvailabilityAdded { slot } => format!("{} available at {}", slot.pilot_uid, slot.time_slot),
        Event::AvailabilityRemoved { slot } => format!("{} off at {}", slot.pilot_uid, slot.time_slot),
        Event::BookingAdded { booking } => format!("booking {} added", booking.id),
        Event::BookingUpdated { booking, .. } => format!("booking {} updated", booking.id),
        Event::EmailQueued { request } => format!("email {} queued", request.id),
        Event::EmailStatusChanged { id, .. } => format!("email {id} status changed"),
    }
}
