mod views;

use crate::app::{App, Mode, ViewState};
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  draw_header(frame, chunks[0], app);

  // Draw current view
  if let Some(view) = app.current_view() {
    match view {
      ViewState::TaskList {
        page,
        selected,
        loading,
      } => {
        views::task_list::draw_task_list(frame, chunks[1], page.as_ref(), *selected, *loading);
      }
      ViewState::TaskDetail { task } => {
        views::task_detail::draw_task_detail(frame, chunks[1], task);
      }
    }
  }

  // Draw status bar
  draw_status_bar(frame, chunks[2], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
  let mut spans = vec![
    Span::styled(
      " t9s ",
      Style::default().fg(Color::Black).bg(Color::Blue),
    ),
    Span::raw(" "),
    Span::styled(app.title(), Style::default().fg(Color::Blue)),
  ];
  if let Some(status) = app.sync_status() {
    spans.push(Span::raw("  "));
    let color = if status.starts_with("sync error") {
      Color::Red
    } else {
      Color::DarkGray
    };
    spans.push(Span::styled(format!("[{}]", status), Style::default().fg(color)));
  }
  frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_status_bar(frame: &mut Frame, area: Rect, app: &App) {
  // A pending toast outranks the mode hints.
  if let Some(toast) = app.toast() {
    let paragraph =
      Paragraph::new(format!(" {}", toast)).style(Style::default().fg(Color::Black).bg(Color::Red));
    frame.render_widget(paragraph, area);
    return;
  }

  let (content, style) = match app.mode() {
    Mode::Normal => {
      let hint = " a:add  space:toggle  d:delete  R:random  r:reload  j/k:nav  Enter:detail  q:quit";
      (hint.to_string(), Style::default().fg(Color::DarkGray))
    }
    Mode::Insert => {
      let input = format!(" add> {}", app.input());
      (input, Style::default().fg(Color::Yellow))
    }
  };

  let paragraph = Paragraph::new(content).style(style);
  frame.render_widget(paragraph, area);
}
