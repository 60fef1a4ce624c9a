use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph},
    Terminal,
};

use crate::controls::StatusSnapshot;

const KEY_HELP: &str = "space pause  ←/→ seek 5s  ↑/↓ volume  q quit";

pub fn draw_status(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    title: &str,
    status: &StatusSnapshot,
    log_lines: &[String],
) {
    let _ = terminal.draw(|f| {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(3),
                Constraint::Length(4),
                Constraint::Min(3),
                Constraint::Length(1),
            ])
            .split(f.size());
        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(rows[2]);

        let header = Paragraph::new(format!("avpace  {}", title))
            .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
        f.render_widget(header, rows[0]);

        let progress = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Position"))
            .gauge_style(Style::default().fg(Color::Green))
            .ratio(status.progress)
            .label(format!("{:.1}%", status.progress * 100.0));
        f.render_widget(progress, rows[1]);

        let playback = Paragraph::new(status.text.as_str())
            .style(Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
            .block(Block::default().borders(Borders::ALL).title("Playback"));
        f.render_widget(playback, panes[0]);

        let sync = Paragraph::new(status.sync.as_str())
            .style(Style::default().fg(Color::Yellow))
            .block(Block::default().borders(Borders::ALL).title("Sync"));
        f.render_widget(sync, panes[1]);

        // Newest lines win when the pane is short.
        let visible = rows[3].height.saturating_sub(2) as usize;
        let start = log_lines.len().saturating_sub(visible);
        let logs = Paragraph::new(log_lines[start..].join("\n"))
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::ALL).title("Logs"));
        f.render_widget(logs, rows[3]);

        f.render_widget(
            Paragraph::new(KEY_HELP).style(Style::default().fg(Color::Blue)),
            rows[4],
        );
    });
}
