use anyhow::Result;
use chrono::{Local, NaiveDate};

use crate::{
    context::TrackerContext,
    report::{aggregate::AggregatedTable, build_report, period::PeriodKind},
    utils::{percentage::share, time::format_hms},
};

#[derive(Debug, Clone, Copy, clap::Args)]
#[group(multiple = false)]
pub struct PeriodFlag {
    #[arg(long, help = "Report a single day. This is the default")]
    day: bool,
    #[arg(long, help = "Report a week, Monday to Sunday")]
    week: bool,
    #[arg(long, help = "Report a calendar month split into weeks")]
    month: bool,
}

impl PeriodFlag {
    fn kind(&self) -> PeriodKind {
        match (self.week, self.month) {
            (true, _) => PeriodKind::Week,
            (_, true) => PeriodKind::Month,
            _ => PeriodKind::Day,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct ReportCommand {
    #[command(flatten)]
    period: PeriodFlag,
    #[arg(
        long,
        short,
        help = "Any date inside the reported period as YYYY-MM-DD. Defaults to today"
    )]
    start_date: Option<NaiveDate>,
    #[arg(long, help = "Print the table as json")]
    json: bool,
}

pub fn process_report_command(context: &TrackerContext, command: ReportCommand) -> Result<()> {
    let kind = command.period.kind();
    let reference = command
        .start_date
        .unwrap_or_else(|| Local::now().date_naive());
    let storage = context.open_storage()?;
    let table = build_report(&storage, kind, reference, &Local)?;

    if command.json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else if table.is_empty() {
        println!("No records for the {kind} of {reference}");
    } else {
        print!("{}", render(&table));
    }
    Ok(())
}

/// Tab separated grid followed by every task's total and share of the period.
fn render(table: &AggregatedTable) -> String {
    let mut output = String::new();
    output.push_str(&format!("\t{}\tTotal\n", table.columns.join("\t")));
    for ((row, cells), total) in table.rows.iter().zip(&table.cells).zip(table.row_totals()) {
        let cells = cells.iter().map(|v| format_hms(*v)).collect::<Vec<_>>();
        output.push_str(&format!("{row}\t{}\t{}\n", cells.join("\t"), format_hms(total)));
    }

    let total = table.total();
    output.push('\n');
    for (task, seconds) in table.columns.iter().zip(table.column_totals()) {
        output.push_str(&format!(
            "{task}\t{}\t{}\n",
            format_hms(seconds),
            share(seconds, total)
        ));
    }
    output.push_str(&format!("Total\t{}\n", format_hms(total)));
    output
}
