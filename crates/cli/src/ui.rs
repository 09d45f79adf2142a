use std::io::{self, IsTerminal};

use chrono::NaiveDate;
use core_model::{Leader, Observation, format_date};
use owo_colors::OwoColorize;
use recurrence::Analysis;

pub fn color_enabled() -> bool {
    io::stdout().is_terminal()
        && io::stderr().is_terminal()
        && std::env::var_os("NO_COLOR").is_none()
}

pub fn leader_line(rank: usize, leader: &Leader, use_color: bool) -> String {
    let count = format!("×{}", leader.count);
    let name = leader.name.as_str();
    if !use_color {
        let marker = if leader.highlighted { "*" } else { " " };
        return format!("{rank:>3}{marker} {name} {count}");
    }
    if leader.highlighted {
        format!(
            "{:>3}{} {} {}",
            rank,
            "*".red().bold(),
            name.red().bold(),
            count.magenta()
        )
    } else {
        format!("{:>3}  {} {}", rank, name.bold(), count.magenta())
    }
}

pub fn print_leaders(analysis: &Analysis) {
    let use_color = color_enabled();
    let header = format!(
        "window {} ~ {} ({} rows)",
        format_date(analysis.window_start),
        format_date(analysis.as_of),
        analysis.window_rows
    );
    if use_color {
        println!("{}", header.dimmed());
    } else {
        println!("{header}");
    }
    if analysis.leaders.is_empty() {
        println!("no recurring names");
        return;
    }
    for (i, leader) in analysis.leaders.iter().enumerate() {
        println!("{}", leader_line(i + 1, leader, use_color));
    }
}

pub fn print_observations(rows: &[Observation]) {
    let use_color = color_enabled();
    for obs in rows {
        let date = format_date(obs.date);
        if use_color {
            println!("{} {}", date.dimmed(), obs.name.as_str());
        } else {
            println!("{date} {}", obs.name.as_str());
        }
    }
}

pub fn print_dates(dates: &[(NaiveDate, usize)]) {
    let use_color = color_enabled();
    for (date, count) in dates {
        let count = format!("{count} names");
        if use_color {
            println!("{} {}", format_date(*date), count.cyan());
        } else {
            println!("{} {count}", format_date(*date));
        }
    }
}
