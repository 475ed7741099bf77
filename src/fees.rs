use chrono::{Datelike, NaiveDate};
use serde::Serialize;

/// Fees fall due on the 20th of their target month.
const DUE_DAY: u32 = 20;
/// Flat fine for paying late within the due month itself.
const SAME_MONTH_FINE: f64 = 30.0;
/// Fine per whole calendar month past the due month.
const PER_MONTH_FINE: f64 = 50.0;

#[derive(Debug, Clone, Serialize)]
pub struct FeeError {
    pub code: String,
    pub message: String,
}

impl FeeError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthFine {
    pub month: String,
    pub fine: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuote {
    pub months: Vec<MonthFine>,
    pub month_count: usize,
    pub fine_total: f64,
    pub total: f64,
}

fn parse_month(month: &str) -> Result<(i32, u32), FeeError> {
    let parsed = month
        .split_once('-')
        .and_then(|(y, m)| Some((y.parse::<i32>().ok()?, m.parse::<u32>().ok()?)))
        .filter(|&(_, m)| (1..=12).contains(&m));
    parsed.ok_or_else(|| FeeError::new("bad_month", format!("invalid month: {month}")))
}

pub fn parse_payment_date(date: &str) -> Result<NaiveDate, FeeError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| FeeError::new("bad_date", format!("invalid payment date: {date}")))
}

/// Late fine for one target month paid on `payment_date`.
///
/// On or before the 20th: no fine. After the 20th but still inside the due
/// month: flat 30. Any later month: 50 per whole calendar month between the
/// due month and the payment month, clamped at zero.
pub fn fine_for_month(month: &str, payment_date: NaiveDate) -> Result<f64, FeeError> {
    let (year, mon) = parse_month(month)?;
    let due = NaiveDate::from_ymd_opt(year, mon, DUE_DAY)
        .ok_or_else(|| FeeError::new("bad_month", format!("invalid month: {month}")))?;

    if payment_date <= due {
        return Ok(0.0);
    }
    if payment_date.year() == year && payment_date.month() == mon {
        return Ok(SAME_MONTH_FINE);
    }

    let months_late =
        (payment_date.year() - year) * 12 + payment_date.month() as i32 - mon as i32;
    Ok(PER_MONTH_FINE * months_late.max(0) as f64)
}

/// Total payable for the closed month range `start..=end` at `base_amount`
/// per month. Rejects `end < start` before computing anything.
pub fn quote(
    start_month: &str,
    end_month: &str,
    base_amount: f64,
    payment_date: NaiveDate,
) -> Result<FeeQuote, FeeError> {
    let start = parse_month(start_month)?;
    let end = parse_month(end_month)?;
    if end < start {
        return Err(FeeError::new(
            "bad_range",
            format!("end month {end_month} is before start month {start_month}"),
        ));
    }

    let mut months = Vec::new();
    let (mut year, mut mon) = start;
    loop {
        let label = format!("{year:04}-{mon:02}");
        let fine = fine_for_month(&label, payment_date)?;
        months.push(MonthFine { month: label, fine });
        if (year, mon) == end {
            break;
        }
        mon += 1;
        if mon > 12 {
            mon = 1;
            year += 1;
        }
    }

    let month_count = months.len();
    let fine_total: f64 = months.iter().map(|m| m.fine).sum();
    let total = base_amount * month_count as f64 + fine_total;
    Ok(FeeQuote {
        months,
        month_count,
        fine_total,
        total,
    })
}
