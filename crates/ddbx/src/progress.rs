// AI
//! 📊 progress.rs — "Are we there yet?" — every transfer, every time, forever.
//!
//! 🚀 One display shared by every worker. Each worker reports the records it moved and
//! the capacity it paid for. This module turns that into a progress bar with a
//! comfy-table for a message, so the operator can watch the budget get spent.
//!
//! ⚠️  Warning: Watching this progress bar will not make it go faster.
//! Neither will raising `capacity_units` past what the table is provisioned for.
//! Preflight will stop you. We've tried. Science says no.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::common::TransferDirection;

/// 🔢 Formats a number with commas for the 3 people in the audience who like readability.
/// "1000000 records" → "1,000,000 records" — you're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ Formats a Duration into MM:SS or HH:MM:SS.
/// If it shows HH:MM:SS, you should probably call your mom. It's been a while.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

#[derive(Debug)]
struct ProgressState {
    total_records: u64,
    total_units: u64,
    /// 🔄 sliding window of (timestamp, records, units) for rate calculation
    rate_samples: VecDeque<(Instant, u64, u64)>,
}

/// 📊 The shared progress display. `&self` everywhere, so one `Arc` feeds every worker.
///
/// Uses a sliding 5-second window for rates so a throttled second doesn't scare you.
pub(crate) struct TransferProgress {
    label: String,
    progress_bar: ProgressBar,
    state: Mutex<ProgressState>,
    start_time: Instant,
}

impl std::fmt::Debug for TransferProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("TransferProgress")
            .field("label", &self.label)
            .finish()
    }
}

impl TransferProgress {
    /// 🚀 `visible = false` draws nothing but still counts.
    pub(crate) fn new(direction: TransferDirection, table: &str, visible: bool) -> Self {
        let progress_bar = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template("{msg}\n{spinner:.cyan} {elapsed_precise}") {
            progress_bar.set_style(style);
        }
        progress_bar.enable_steady_tick(Duration::from_millis(250));

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64, 0u64));

        Self {
            label: format!("{direction}: {table}"),
            progress_bar,
            state: Mutex::new(ProgressState {
                total_records: 0,
                total_units: 0,
                rate_samples,
            }),
            start_time,
        }
    }

    /// 🔄 A worker moved `records` records and paid `units` capacity units for them.
    pub(crate) fn record(&self, records: u64, units: u64) {
        let Ok(mut state) = self.state.lock() else {
            // -- 🧟 a worker panicked mid-update; the numbers are cosmetic, skip them
            return;
        };
        state.total_records += records;
        state.total_units += units;
        let (records_per_sec, units_per_sec) = calculate_rates(&mut state);
        let message = self.render(&state, records_per_sec, units_per_sec);
        self.progress_bar.set_message(message);
    }

    /// ✅ Mark the progress bar done. Ring the bell. We made it.
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    fn render(&self, state: &ProgressState, records_per_sec: f64, units_per_sec: f64) -> String {
        // 🍽️ two columns, right-aligned, no borders
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} records/s", format_number(records_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} records", format_number(state.total_records)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.1} units/s", units_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} units", format_number(state.total_units)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
        ]);
        format!("{}\n{}", self.label, table)
    }
}

/// 📈 Records/s and units/s over the last five seconds.
fn calculate_rates(state: &mut ProgressState) -> (f64, f64) {
    let now = Instant::now();
    let window = Duration::from_secs(5);
    while let Some(&(timestamp, _, _)) = state.rate_samples.front() {
        if now.duration_since(timestamp) > window {
            state.rate_samples.pop_front();
        } else {
            break;
        }
    }
    state
        .rate_samples
        .push_back((now, state.total_records, state.total_units));

    match state.rate_samples.front() {
        Some(&(oldest, oldest_records, oldest_units)) => {
            let elapsed = now.duration_since(oldest).as_secs_f64();
            if elapsed > 0.0 {
                (
                    state.total_records.saturating_sub(oldest_records) as f64 / elapsed,
                    state.total_units.saturating_sub(oldest_units) as f64 / elapsed,
                )
            } else {
                (0.0, 0.0)
            }
        }
        // -- 💤 not enough elapsed time yet — zeros and composure
        None => (0.0, 0.0),
    }
}
