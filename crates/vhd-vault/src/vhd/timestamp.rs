//! VHD creation timestamps: seconds since 2000-01-01 00:00:00, with the
//! historical quirk that Virtual PC 6 wrote this field as local wall-clock
//! time rather than UTC.

use chrono::{DateTime, Duration, Local, TimeZone, Utc};

/// Seconds from the FILETIME epoch (1601-01-01) to the VHD epoch
/// (2000-01-01), counting leap years the way the format's original writer
/// did: 399 ordinary years plus 24 leap-day years of slack.
const SECONDS_2000: i64 = 3600 * 24 * (399 * 365 + 24 * 4);

fn filetime_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).single().expect("1601-01-01 is representable")
}

/// The raw field value interpreted literally as UTC seconds since
/// 2000-01-01, with no local-time reinterpretation.
pub fn ctime_raw_utc(vhd_time: u32) -> DateTime<Utc> {
    filetime_epoch() + Duration::seconds(SECONDS_2000 + vhd_time as i64)
}

/// The field value as most VHD writers actually meant it: some tools
/// (Virtual PC 6 among them) stored local wall-clock time here instead of
/// UTC. This reinterprets the raw UTC-shaped value as a local timestamp and
/// converts it to true UTC, equivalent to `LocalFileTimeToFileTime`. Falls
/// back to the unadjusted value if the local offset can't be resolved for
/// that instant (e.g. inside a DST gap).
pub fn ctime(vhd_time: u32) -> DateTime<Utc> {
    let naive = ctime_raw_utc(vhd_time).naive_utc();
    match Local.from_local_datetime(&naive).single() {
        Some(local) => local.with_timezone(&Utc),
        None => ctime_raw_utc(vhd_time),
    }
}
