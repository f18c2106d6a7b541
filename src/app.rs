use crate::config::Config;
use crate::event::{DataEvent, Event, EventHandler};
use crate::store::{Task, TaskPage};
use crate::sync::{
  CacheEvent, CacheValue, EntryStatus, KeyPrefix, QueryKey, SyncEngine, SyncEvent, WatchGuard,
};
use crate::ui;
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// The root list window shown by the UI.
const PAGE_LIMIT: u64 = 30;
const LIST_KEY: QueryKey = QueryKey::List {
  limit: PAGE_LIMIT,
  skip: 0,
};

/// How long a toast stays visible.
const TOAST_DURATION: Duration = Duration::from_secs(3);

/// Input mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  Normal,
  /// Typing the text of a new task
  Insert,
}

/// View state - each variant owns its data
#[derive(Debug)]
pub enum ViewState {
  TaskList {
    page: Option<TaskPage>,
    selected: usize,
    loading: bool,
  },
  // Pushed via Enter
  TaskDetail {
    task: Box<Task>,
  },
}

/// Main application state
pub struct App {
  /// Navigation stack - root is always at index 0
  view_stack: Vec<ViewState>,

  /// Current input mode
  mode: Mode,

  /// Insert-mode input buffer
  input: String,

  /// Transient status message with its display deadline
  toast: Option<(String, Instant)>,

  /// Application configuration
  config: Config,

  /// Sync engine over the task store
  engine: Arc<SyncEngine>,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  /// Keeps the root list key fresh via background refresh
  _list_watch: WatchGuard,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(config: Config, engine: Arc<SyncEngine>) -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();
    let list_watch = engine.watch(LIST_KEY);

    Self {
      view_stack: vec![ViewState::TaskList {
        page: None,
        selected: 0,
        loading: true,
      }],
      mode: Mode::Normal,
      input: String::new(),
      toast: None,
      config,
      engine,
      event_tx: tx,
      _list_watch: list_watch,
      should_quit: false,
    }
  }

  pub fn current_view(&self) -> Option<&ViewState> {
    self.view_stack.last()
  }

  pub fn mode(&self) -> &Mode {
    &self.mode
  }

  pub fn input(&self) -> &str {
    &self.input
  }

  pub fn toast(&self) -> Option<&str> {
    self.toast.as_ref().map(|(msg, _)| msg.as_str())
  }

  pub fn title(&self) -> String {
    self.config.display_title()
  }

  /// Short indicator for the header: refreshing, stale, or sync error.
  pub fn sync_status(&self) -> Option<String> {
    let entry = self.engine.cache().read(LIST_KEY);
    match entry.status {
      EntryStatus::Error => {
        let detail = entry.error.unwrap_or_else(|| "unknown error".to_string());
        Some(format!("sync error: {}", detail))
      }
      EntryStatus::Fetching => Some("refreshing".to_string()),
      _ if entry.stale => Some("stale".to_string()),
      _ => None,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create event handler
    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();
    self.spawn_forwarders();

    // Initial data load
    self.load_list();

    // Main loop
    while !self.should_quit {
      // Draw UI
      terminal.draw(|frame| ui::draw(frame, self))?;

      // Handle events
      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
  }

  /// Forward engine notifications into the app event loop.
  fn spawn_forwarders(&self) {
    let mut cache_rx = self.engine.subscribe_cache();
    let tx = self.event_tx.clone();
    tokio::spawn(async move {
      loop {
        match cache_rx.recv().await {
          Ok(event) => {
            if tx.send(Event::Cache(event)).is_err() {
              break;
            }
          }
          Err(broadcast::error::RecvError::Lagged(_)) => continue,
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    });

    let mut sync_rx = self.engine.subscribe();
    let tx = self.event_tx.clone();
    tokio::spawn(async move {
      loop {
        match sync_rx.recv().await {
          Ok(SyncEvent::MutationFailed { kind, message }) => {
            let toast = format!("Failed to {} task: {}", kind.describe(), message);
            if tx.send(Event::Toast(toast)).is_err() {
              break;
            }
          }
          Err(broadcast::error::RecvError::Lagged(_)) => continue,
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    });
  }

  fn load_list(&self) {
    let engine = self.engine.clone();
    let tx = self.event_tx.clone();

    tokio::spawn(async move {
      match engine.list(PAGE_LIMIT, 0).await {
        Ok(page) => {
          let _ = tx.send(Event::Data(DataEvent::ListLoaded(page)));
        }
        Err(e) => {
          let _ = tx.send(Event::Data(DataEvent::ListFailed(e.to_string())));
        }
      }
    });
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {
        if let Some((_, deadline)) = &self.toast {
          if Instant::now() >= *deadline {
            self.toast = None;
          }
        }
      }
      Event::Data(data) => self.handle_data_event(data),
      Event::Cache(event) => self.handle_cache_event(event),
      Event::Toast(message) => self.show_toast(message),
    }
  }

  fn handle_data_event(&mut self, event: DataEvent) {
    match event {
      DataEvent::ListLoaded(new_page) => {
        if let Some(ViewState::TaskList {
          page,
          selected,
          loading,
        }) = self.view_stack.first_mut()
        {
          *selected = (*selected).min(new_page.tasks.len().saturating_sub(1));
          *page = Some(new_page);
          *loading = false;
        }
      }
      DataEvent::ListFailed(message) => {
        if let Some(ViewState::TaskList { loading, .. }) = self.view_stack.first_mut() {
          *loading = false;
        }
        self.show_toast(format!("Failed to load tasks: {}", message));
      }
      DataEvent::RandomLoaded(task) => {
        self.view_stack.push(ViewState::TaskDetail {
          task: Box::new(task),
        });
      }
    }
  }

  /// Mirror cache changes into the views, so optimistic writes, commits,
  /// and rollbacks all show up immediately.
  fn handle_cache_event(&mut self, event: CacheEvent) {
    match event {
      CacheEvent::Updated(key) if key == LIST_KEY => {
        let entry = self.engine.cache().read(LIST_KEY);
        if let Some(CacheValue::Page(new_page)) = entry.data {
          if let Some(ViewState::TaskList { page, selected, .. }) = self.view_stack.first_mut() {
            *selected = (*selected).min(new_page.tasks.len().saturating_sub(1));
            *page = Some(new_page);
          }
        }
      }
      CacheEvent::Invalidated(key) if key == LIST_KEY => {
        if let Some(ViewState::TaskList { loading, .. }) = self.view_stack.first_mut() {
          // The list watch refetches in the background; show it.
          *loading = true;
        }
      }
      CacheEvent::Updated(QueryKey::Detail { id }) => {
        if let Some(ViewState::TaskDetail { task }) = self.view_stack.last_mut() {
          if task.id == id {
            let entry = self.engine.cache().read(QueryKey::Detail { id });
            if let Some(CacheValue::Task(fresh)) = entry.data {
              *task = Box::new(fresh);
            }
          }
        }
      }
      CacheEvent::Removed(QueryKey::Detail { id }) => {
        let showing_deleted = matches!(
          self.view_stack.last(),
          Some(ViewState::TaskDetail { task }) if task.id == id
        );
        if showing_deleted && self.view_stack.len() > 1 {
          self.view_stack.pop();
        }
      }
      _ => {}
    }
  }

  fn handle_key(&mut self, key: crossterm::event::KeyEvent) {
    match self.mode {
      Mode::Normal => self.handle_normal_mode_key(key),
      Mode::Insert => self.handle_insert_mode_key(key),
    }
  }

  fn handle_normal_mode_key(&mut self, key: crossterm::event::KeyEvent) {
    match key.code {
      // Quit
      KeyCode::Char('q') => {
        if self.view_stack.len() > 1 {
          self.view_stack.pop();
        } else {
          self.should_quit = true;
        }
      }
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }

      // Navigation
      KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
      KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
      KeyCode::Enter => self.enter_selected(),
      KeyCode::Esc => {
        if self.view_stack.len() > 1 {
          self.view_stack.pop();
        }
      }

      // Mutations
      KeyCode::Char('a') => {
        self.mode = Mode::Insert;
        self.input.clear();
      }
      KeyCode::Char(' ') => self.toggle_current(),
      KeyCode::Char('d') => self.delete_current(),

      // Reads
      KeyCode::Char('r') => self.reload(),
      KeyCode::Char('R') => self.load_random(),

      _ => {}
    }
  }

  fn handle_insert_mode_key(&mut self, key: crossterm::event::KeyEvent) {
    match key.code {
      KeyCode::Esc => {
        self.mode = Mode::Normal;
        self.input.clear();
      }
      KeyCode::Enter => {
        let text = std::mem::take(&mut self.input);
        self.mode = Mode::Normal;
        self.add_task(text);
      }
      KeyCode::Backspace => {
        self.input.pop();
      }
      KeyCode::Char(c) => {
        self.input.push(c);
      }
      _ => {}
    }
  }

  fn move_selection(&mut self, delta: isize) {
    if let Some(ViewState::TaskList {
      page: Some(page),
      selected,
      ..
    }) = self.view_stack.last_mut()
    {
      let len = page.tasks.len();
      if len == 0 {
        return;
      }
      let next = (*selected as isize + delta).clamp(0, len as isize - 1);
      *selected = next as usize;
    }
  }

  /// Id of the task the cursor is on, or `None` when it is a placeholder
  /// still waiting on the server (mutations on those are refused).
  fn selected_task_id(&mut self) -> Option<i64> {
    let id = match self.view_stack.last()? {
      ViewState::TaskList {
        page: Some(page),
        selected,
        ..
      } => page.tasks.get(*selected)?.id,
      ViewState::TaskDetail { task } => task.id,
      _ => return None,
    };
    if id < 0 {
      self.show_toast("Task is still saving".to_string());
      return None;
    }
    Some(id)
  }

  fn enter_selected(&mut self) {
    let task = match self.view_stack.last() {
      Some(ViewState::TaskList {
        page: Some(page),
        selected,
        ..
      }) => page.tasks.get(*selected).cloned(),
      _ => None,
    };
    let Some(task) = task else {
      return;
    };
    if task.id < 0 {
      self.show_toast("Task is still saving".to_string());
      return;
    }
    let id = task.id;
    self.view_stack.push(ViewState::TaskDetail {
      task: Box::new(task),
    });

    // Warm the detail key; the view updates when it lands.
    let engine = self.engine.clone();
    tokio::spawn(async move {
      if let Err(e) = engine.detail(id).await {
        warn!(id, error = %e, "detail fetch failed");
      }
    });
  }

  fn add_task(&mut self, text: String) {
    let engine = self.engine.clone();
    tokio::spawn(async move {
      // Failures surface through the engine's event stream.
      if let Err(e) = engine.add_task(&text).await {
        warn!(error = %e, "add task failed");
      }
    });
  }

  fn toggle_current(&mut self) {
    let Some(id) = self.selected_task_id() else {
      return;
    };
    let engine = self.engine.clone();
    tokio::spawn(async move {
      if let Err(e) = engine.toggle_task(id).await {
        warn!(id, error = %e, "toggle task failed");
      }
    });
  }

  fn delete_current(&mut self) {
    let Some(id) = self.selected_task_id() else {
      return;
    };
    let engine = self.engine.clone();
    tokio::spawn(async move {
      if let Err(e) = engine.delete_task(id).await {
        warn!(id, error = %e, "delete task failed");
      }
    });
  }

  fn reload(&mut self) {
    self.engine.cache().invalidate(&KeyPrefix::Lists);
    self.load_list();
  }

  fn load_random(&self) {
    // A fresh pick every time, not the cached one.
    self.engine.cache().invalidate(&KeyPrefix::Random);
    let engine = self.engine.clone();
    let tx = self.event_tx.clone();
    tokio::spawn(async move {
      match engine.random().await {
        Ok(task) => {
          let _ = tx.send(Event::Data(DataEvent::RandomLoaded(task)));
        }
        Err(e) => {
          let _ = tx.send(Event::Toast(format!("Failed to load random task: {}", e)));
        }
      }
    });
  }

  fn show_toast(&mut self, message: String) {
    self.toast = Some((message, Instant::now() + TOAST_DURATION));
  }
}
