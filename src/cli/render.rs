//! Terminal rendering for the dashboard and the task board.

use console::{Term, style};

use crate::dashboard::{DashboardView, PLACEHOLDER, Renderer};
use crate::tasks::{ActivityLog, PipelineReceipt, TaskBoard, TaskStatus};

/// Redraws the dashboard in place on an interactive terminal.
pub struct ConsoleRenderer {
    term: Term,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }

    fn draw(&self, view: &DashboardView) -> std::io::Result<()> {
        if self.term.is_term() {
            self.term.clear_screen()?;
        }
        let metric = |v: &str| {
            if v == PLACEHOLDER {
                style(v.to_string()).red().bold()
            } else {
                style(v.to_string()).green()
            }
        };

        self.term.write_line(&format!(
            "{}  {}",
            style("echonet dashboard").bold(),
            style(&view.clock).dim()
        ))?;
        self.term.write_line(&format!(
            "CPU: {}%   Battery: {}%",
            metric(&view.cpu),
            metric(&view.battery)
        ))?;
        self.term.write_line("")?;
        self.term.write_line(&style("Nodes").underlined().to_string())?;
        if view.nodes.is_empty() {
            self.term.write_line(&style("  (none)").dim().to_string())?;
        }
        for line in &view.nodes {
            self.term.write_line(&format!("  {line}"))?;
        }
        Ok(())
    }
}

impl Renderer for ConsoleRenderer {
    fn render(&mut self, view: &DashboardView) {
        if let Err(e) = self.draw(view) {
            log::warn!("Failed to draw dashboard: {e}");
        }
    }
}

fn status_label(status: TaskStatus) -> String {
    let label = style(status.label());
    match status {
        TaskStatus::Pending => label.dim(),
        TaskStatus::Dispatching => label.yellow(),
        TaskStatus::Done => label.green(),
        TaskStatus::Failed => label.red().bold(),
    }
    .to_string()
}

/// Prints every card on the board, or its notice.
pub fn print_board(board: &TaskBoard) {
    if let Some(notice) = board.notice() {
        println!("{}", style(notice).yellow());
        return;
    }
    for card in board.cards() {
        println!("{}", style(card.header()).bold().cyan());
        for line in card.body().lines() {
            println!("  {line}");
        }
        println!("  [{}]", status_label(card.status));
        println!();
    }
}

/// Prints a pipeline receipt and any poems it carries.
pub fn print_receipt(receipt: &PipelineReceipt) {
    println!("Submitted, task_id={}", style(receipt.task_id()).bold());
    if let Some(state) = &receipt.final_state {
        println!("{}", style("English poem").underlined());
        println!("{}", state.english());
        println!("{}", style("Chinese poem").underlined());
        println!("{}", state.chinese());
    }
}

/// Prints the activity log.
pub fn print_log(log: &ActivityLog) {
    for line in log.lines() {
        println!("{}", style(line).dim());
    }
}
