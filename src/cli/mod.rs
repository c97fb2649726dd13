//! Terminal front end: table rendering for list results and the interactive shell.

use chrono::{DateTime, Utc};

use crate::model::{Invoice, InvoiceSummary, MeterReading, UserProfile};
use crate::policy::{self, InvoiceTally};

pub mod shell;

pub use shell::{Command, Reply, Shell};

const MAX_COL_WIDTH: usize = 40;

/// Render rows as an ASCII table; an empty row set renders as `(none)`.
pub fn render_table(cols: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "(none)".to_string();
    }
    let mut widths: Vec<usize> = cols.iter().map(|c| display_len(c).min(MAX_COL_WIDTH)).collect();
    for r in rows {
        for (i, cell) in r.iter().enumerate().take(cols.len()) {
            let w = display_len(cell);
            if w > widths[i] { widths[i] = w.min(MAX_COL_WIDTH); }
        }
    }
    let header: Vec<String> = cols.iter().map(|c| c.to_string()).collect();
    let sep = build_separator(&widths);
    let mut out = Vec::with_capacity(rows.len() + 4);
    out.push(sep.clone());
    out.push(build_row(&header, &widths));
    out.push(sep.clone());
    for r in rows {
        out.push(build_row(r, &widths));
    }
    out.push(sep);
    out.join("\n")
}

/// Readings with the actions the current user is offered on each.
pub fn readings_table(user: &UserProfile, readings: &[MeterReading], total: u64, with_owner: bool) -> String {
    let mut cols = vec!["id", "type", "value", "date", "status"];
    if with_owner { cols.push("resident"); }
    cols.push("actions");
    let rows: Vec<Vec<String>> = readings
        .iter()
        .map(|r| {
            let mut row = vec![
                r.id.to_string(),
                r.meter_type.to_string(),
                format!("{:.2}", r.reading_value),
                short_date(&r.reading_date),
                if r.verified { "verified".to_string() } else { "pending".to_string() },
            ];
            if with_owner {
                row.push(match &r.user {
                    Some(u) => match &u.apartment_number {
                        Some(apt) => format!("{} ({})", u.full_name, apt),
                        None => u.full_name.clone(),
                    },
                    None => format!("user {}", r.user_id),
                });
            }
            let mut actions = Vec::new();
            if policy::can_verify_reading(user, r) { actions.push("verify"); }
            if policy::can_delete_reading(user, r) { actions.push("delete"); }
            row.push(actions.join(","));
            row
        })
        .collect();
    format!("{}\nshowing {} of {}", render_table(&cols, &rows), readings.len(), total)
}

pub fn invoices_table(user: &UserProfile, invoices: &[Invoice], total: u64, now: DateTime<Utc>) -> String {
    let cols = ["id", "number", "amount", "consumption", "due", "status", "actions"];
    let rows: Vec<Vec<String>> = invoices
        .iter()
        .map(|i| {
            let status = if i.paid {
                "paid"
            } else if policy::is_overdue(i, now) {
                "overdue"
            } else {
                "pending"
            };
            vec![
                i.id.to_string(),
                i.invoice_number.clone(),
                format!("{:.2}", i.amount),
                format!("{:.2}", i.consumption),
                short_date(&i.due_date),
                status.to_string(),
                if policy::can_pay_invoice(user, i) { "pay".to_string() } else { String::new() },
            ]
        })
        .collect();
    let t = InvoiceTally::of(invoices);
    format!(
        "{}\nshowing {} of {}; paid {}, pending {}, amount {:.2}",
        render_table(&cols, &rows),
        invoices.len(),
        total,
        t.paid,
        t.pending,
        t.total_amount
    )
}

pub fn summary_lines(s: &InvoiceSummary) -> String {
    render_table(
        &["", "count", "amount"],
        &[
            vec!["total".into(), s.total_invoices.to_string(), format!("{:.2}", s.total_amount)],
            vec!["paid".into(), s.paid_invoices.to_string(), format!("{:.2}", s.paid_amount)],
            vec!["pending".into(), s.pending_invoices.to_string(), format!("{:.2}", s.pending_amount)],
        ],
    )
}

fn short_date(t: &DateTime<Utc>) -> String { t.format("%Y-%m-%d").to_string() }

fn display_len(s: &str) -> usize { s.chars().count() }

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('+');
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('|');
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).cloned().unwrap_or_default();
        let text = truncate(&cell, *w);
        let pad = " ".repeat(w.saturating_sub(display_len(&text)));
        s.push(' ');
        // numbers right-aligned
        if is_numeric_like(&cell) {
            s.push_str(&pad);
            s.push_str(&text);
        } else {
            s.push_str(&text);
            s.push_str(&pad);
        }
        s.push_str(" |");
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    let st = s.trim();
    let mut has_digit = false;
    for ch in st.chars() {
        if ch.is_ascii_digit() { has_digit = true; continue; }
        if ".-+,".contains(ch) { continue; }
        return false;
    }
    has_digit
}
