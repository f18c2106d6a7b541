use crate::store::Task;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

pub fn draw_task_detail(frame: &mut Frame, area: Rect, task: &Task) {
  let title = format!(" Task #{} ", task.id);

  let block = Block::default()
    .title(title)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let status = if task.completed {
    Span::styled("completed", Style::default().fg(Color::Green))
  } else {
    Span::styled("open", Style::default().fg(Color::Yellow))
  };

  let lines = vec![
    Line::from(vec![
      Span::styled("Text:      ", Style::default().fg(Color::Cyan)),
      Span::raw(task.text.clone()),
    ]),
    Line::from(vec![
      Span::styled("Status:    ", Style::default().fg(Color::Cyan)),
      status,
    ]),
    Line::from(vec![
      Span::styled("Owner:     ", Style::default().fg(Color::Cyan)),
      Span::raw(task.owner_id.to_string()),
    ]),
    Line::from(""),
    Line::from(Span::styled(
      "space:toggle  d:delete  q:back",
      Style::default().fg(Color::DarkGray),
    )),
  ];

  let paragraph = Paragraph::new(lines).block(block).wrap(Wrap { trim: false });
  frame.render_widget(paragraph, area);
}
