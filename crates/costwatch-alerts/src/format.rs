//! Human-readable rendering of alert values and conditions.

use std::collections::HashMap;

use num_format::{Locale, ToFormattedString};

use crate::types::{Alert, Condition, Config, Metric};

/// Groups the integer part of a fixed-point number with commas: `1234567.5` → `1,234,567.50`.
#[must_use]
pub fn group_thousands(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = int_part
        .parse::<u128>()
        .map_or_else(|_| int_part.to_string(), |n| n.to_formatted_string(&Locale::en));
    if let Some(frac_part) = frac_part {
        grouped.push('.');
        grouped.push_str(frac_part);
    }

    let negative = value < 0.0 && grouped.chars().any(|c| c.is_ascii_digit() && c != '0');
    if negative {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Symbol used in front of amounts in the given ISO currency.
#[must_use]
pub fn currency_symbol(currency: &str) -> &str {
    match currency {
        "USD" => "$",
        "EUR" => "€",
        "GBP" => "£",
        "AUD" => "A$",
        "CAD" => "C$",
        "JPY" => "¥",
        "ILS" => "₪",
        "BRL" => "R$",
        "NOK" => "kr",
        "DKK" => "kr.",
        "SEK" => "kr",
        "CHF" => "CHF ",
        "MXN" => "MX$",
        "SGD" => "S$",
        "ZAR" => "R",
        "IDR" => "Rp",
        "TWD" => "NT$",
        "EGP" => "E£",
        other => other,
    }
}

/// Formats an amount in a currency: `$1,234.56`, `-€12.00`.
#[must_use]
pub fn format_currency(value: f64, currency: &str) -> String {
    let amount = group_thousands(value, 2);
    let symbol = currency_symbol(currency);
    match amount.strip_prefix('-') {
        Some(abs) => format!("-{symbol}{abs}"),
        None => format!("{symbol}{amount}"),
    }
}

/// Formats a detected value the way the alert presents it.
///
/// Percentage alerts render `12.50%`, usage renders a plain grouped number, every
/// other metric renders as an amount in the alert's currency.
#[must_use]
pub fn format_value(config: &Config, value: f64) -> String {
    if config.condition == Condition::Percentage {
        format!("{}%", group_thousands(value, 2))
    } else if config.metric == Metric::Usage {
        group_thousands(value, 2)
    } else {
        format_currency(value, &config.currency)
    }
}

/// Label of the alert's metric for condition sentences.
///
/// Extended metrics are looked up in `extended_labels`; calculated metrics use their name.
#[must_use]
pub fn metric_label(config: &Config, extended_labels: &HashMap<String, String>) -> String {
    match config.metric {
        Metric::Extended => config
            .extended_metric
            .as_ref()
            .map(|key| extended_labels.get(key).unwrap_or(key).clone())
            .unwrap_or_else(|| "extended metric".to_string()),
        Metric::Custom => config
            .calculated_metric
            .as_ref()
            .map_or_else(|| "custom metric".to_string(), |m| m.name.clone()),
        other => other.as_str().to_string(),
    }
}

/// Builds the sentence describing an alert, e.g. `Daily cost value greater than $100.00`.
#[must_use]
pub fn condition_sentence(alert: &Alert, extended_labels: &HashMap<String, String>) -> String {
    let config = &alert.config;
    let threshold = format_value(config, config.threshold().unwrap_or_default());
    format!(
        "{} {} {} {} {}",
        config.time_interval.label(),
        metric_label(config, extended_labels),
        config.condition.label(),
        config.operator.words(),
        threshold
    )
}
