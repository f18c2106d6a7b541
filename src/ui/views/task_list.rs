use crate::store::TaskPage;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

pub fn draw_task_list(
  frame: &mut Frame,
  area: Rect,
  page: Option<&TaskPage>,
  selected: usize,
  loading: bool,
) {
  let title = match page {
    Some(page) => {
      if loading {
        format!(" Tasks ({}/{}) (refreshing...) ", page.tasks.len(), page.total)
      } else {
        format!(" Tasks ({}/{}) ", page.tasks.len(), page.total)
      }
    }
    None => " Tasks (loading...) ".to_string(),
  };

  let block = Block::default()
    .title(title)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let Some(page) = page else {
    let paragraph = Paragraph::new("Loading tasks...")
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  };

  if page.tasks.is_empty() {
    let paragraph = Paragraph::new("No tasks. Press 'a' to add one.")
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let items: Vec<ListItem> = page
    .tasks
    .iter()
    .map(|task| {
      let (marker, marker_color) = if task.completed {
        ("[x]", Color::Green)
      } else {
        ("[ ]", Color::White)
      };
      // Placeholder rows are still waiting on the server.
      let pending = task.id < 0;
      let text_style = if pending {
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC)
      } else if task.completed {
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::CROSSED_OUT)
      } else {
        Style::default().fg(Color::White)
      };

      let line = Line::from(vec![
        Span::styled(marker, Style::default().fg(marker_color)),
        Span::raw(" "),
        Span::styled(truncate(&task.text, 70), text_style),
        if pending {
          Span::styled(" (saving...)", Style::default().fg(Color::Yellow))
        } else {
          Span::raw("")
        },
      ]);
      ListItem::new(line)
    })
    .collect();

  let list = List::new(items)
    .block(block)
    .highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

  let mut state = ListState::default();
  state.select(Some(selected.min(page.tasks.len().saturating_sub(1))));

  frame.render_stateful_widget(list, area, &mut state);
}

fn truncate(s: &str, max_len: usize) -> String {
  if s.len() <= max_len {
    s.to_string()
  } else {
    format!("{}...", &s[..max_len.saturating_sub(3)])
  }
}
