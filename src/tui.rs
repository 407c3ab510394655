use crate::api::RestClient;
use crate::events::{ActionRequest, EventBus, UiEvent};
use crate::node::Node;
use crate::sync::SyncEngine;
use crate::tree::{
    breadcrumb, build_tree, collect_nodes, node_map, reparent, FlatNode, TreeNode, TreeView,
};
use crate::watch::{self, MarkerWatcher};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use std::collections::HashSet;
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

struct App {
    nodes: Vec<Node>,
    tree: Vec<TreeNode>,
    view: TreeView,
    visible: Vec<FlatNode>,
    selected: usize,
    grabbed: Option<String>,
    crumbs: Vec<Node>,
    status: String,
}

impl App {
    fn new(nodes: Vec<Node>) -> Self {
        let mut app = Self {
            nodes,
            tree: Vec::new(),
            view: TreeView::new(),
            visible: Vec::new(),
            selected: 0,
            grabbed: None,
            crumbs: Vec::new(),
            status: String::new(),
        };
        app.rebuild();
        app
    }

    /// Re-derive everything from the flat list. Expand state carries over for
    /// ids that still exist.
    fn rebuild(&mut self) {
        self.tree = build_tree(&self.nodes);
        let map = node_map(&self.tree);
        let known: HashSet<String> = map.keys().cloned().collect();
        self.view.retain_known(&known);
        self.visible = self.view.visible(&self.tree);
        if !self.visible.is_empty() && self.selected >= self.visible.len() {
            self.selected = self.visible.len() - 1;
        }
        self.refresh_crumbs();
    }

    fn refresh_crumbs(&mut self) {
        let map = node_map(&self.tree);
        self.crumbs = match self.visible.get(self.selected) {
            Some(row) => match breadcrumb(&row.id, &map) {
                Ok(chain) => chain,
                Err(e) => {
                    self.status = e.to_string();
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
    }

    fn selected_row(&self) -> Option<&FlatNode> {
        self.visible.get(self.selected)
    }
}

/// Interactive tree browser: expand/collapse, breadcrumbs, grab-drop move.
pub async fn run_browser(
    engine: &mut SyncEngine<RestClient>,
    bus: Arc<EventBus>,
) -> anyhow::Result<()> {
    let cache_events = bus.subscribe();
    let _watcher: Option<MarkerWatcher> = match engine.store().marker_path() {
        Some(marker) => Some(watch::start_watching(marker, bus.clone())?),
        None => None,
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(engine.initialize().await);
    let result = run_app(&mut terminal, &mut app, engine, &bus, &cache_events).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    engine: &mut SyncEngine<RestClient>,
    bus: &Arc<EventBus>,
    cache_events: &Receiver<UiEvent>,
) -> anyhow::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app, engine))?;

        // Another process rewrote the cache: re-read and re-derive
        while let Ok(event) = cache_events.try_recv() {
            if event == UiEvent::CacheChangedExternally {
                app.nodes = engine.cached();
                app.rebuild();
            }
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Up => {
                app.selected = app.selected.saturating_sub(1);
                app.refresh_crumbs();
            }
            KeyCode::Down => {
                if app.selected + 1 < app.visible.len() {
                    app.selected += 1;
                }
                app.refresh_crumbs();
            }
            KeyCode::Enter | KeyCode::Right => {
                if let Some((id, expandable, is_folder)) = app
                    .selected_row()
                    .map(|row| (row.id.clone(), row.expandable, row.is_folder))
                {
                    if expandable {
                        if key.code == KeyCode::Right {
                            app.view.expand(&id);
                        } else {
                            app.view.toggle(&id);
                        }
                    }
                    if is_folder {
                        bus.publish(UiEvent::FolderSelected(id));
                    }
                    app.visible = app.view.visible(&app.tree);
                    app.refresh_crumbs();
                }
            }
            KeyCode::Left => {
                // Collapse an expanded row, otherwise jump to its parent
                if let Some((id, parent_id)) = app
                    .selected_row()
                    .map(|row| (row.id.clone(), row.parent_id.clone()))
                {
                    if app.view.is_expanded(&id) {
                        app.view.collapse(&id);
                        app.visible = app.view.visible(&app.tree);
                    } else if let Some(parent) = parent_id {
                        if let Some(pos) = app.visible.iter().position(|f| f.id == parent) {
                            app.selected = pos;
                        }
                    }
                    app.refresh_crumbs();
                }
            }
            KeyCode::Char(' ') => grab_or_drop(app, engine, bus).await,
            KeyCode::Char('r') => {
                app.nodes = engine.get_data_tree().await?;
                app.rebuild();
                app.status = "refreshed".to_string();
            }
            KeyCode::Char('o') => {
                let going_online = !engine.is_online();
                match engine.set_online(going_online).await {
                    Ok(Some(report)) => {
                        app.status = format!(
                            "online: replayed {}, {} still queued",
                            report.applied, report.failed
                        );
                        app.nodes = engine.cached();
                        app.rebuild();
                    }
                    Ok(None) => {
                        app.status = if going_online { "online" } else { "offline" }.to_string()
                    }
                    Err(e) => app.status = e.to_string(),
                }
            }
            KeyCode::Char(c) if c.is_ascii_digit() => {
                // Jump to the n-th breadcrumb ancestor
                let index = c.to_digit(10).unwrap_or(0) as usize;
                if let Some(crumb) = app.crumbs.get(index).cloned() {
                    bus.publish(UiEvent::BreadcrumbClick(crumb.clone()));
                    if let Some(pos) = app.visible.iter().position(|f| f.id == crumb.id) {
                        app.selected = pos;
                        app.refresh_crumbs();
                    }
                }
            }
            _ => {}
        }
    }
}

/// First press grabs the selected node; second press drops it onto the row
/// under the cursor. The view is re-parented immediately, then the move is
/// pushed through the engine (or queued when offline).
async fn grab_or_drop(app: &mut App, engine: &SyncEngine<RestClient>, bus: &Arc<EventBus>) {
    match app.grabbed.take() {
        None => {
            if let Some((id, name)) = app
                .selected_row()
                .map(|row| (row.id.clone(), row.name.clone()))
            {
                app.status = format!("grabbed {name}");
                app.grabbed = Some(id);
            }
        }
        Some(dragged) => match reparent(&app.tree, &app.visible, app.selected, &dragged) {
            Ok(Some(updated)) => {
                let dest_id = app.visible[app.selected].id.clone();
                bus.publish(UiEvent::Action(ActionRequest::Move {
                    id: dragged.clone(),
                    dest_id: dest_id.clone(),
                }));
                match engine.move_node(&dragged, &dest_id).await {
                    Ok(moved) => {
                        app.nodes = collect_nodes(&updated);
                        app.rebuild();
                        app.status = format!("moved {}", moved.name);
                    }
                    Err(e) => app.status = e.to_string(),
                }
            }
            Ok(None) => app.status = "drop ignored".to_string(),
            Err(e) => app.status = e.to_string(),
        },
    }
}

fn ui(f: &mut Frame, app: &App, engine: &SyncEngine<RestClient>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(2),
        ])
        .split(f.area());

    // Breadcrumb bar
    let crumbs = app
        .crumbs
        .iter()
        .map(|n| n.name.as_str())
        .collect::<Vec<_>>()
        .join(" / ");
    f.render_widget(
        Paragraph::new(Line::from(Span::styled(
            crumbs,
            Style::default().add_modifier(Modifier::BOLD),
        ))),
        chunks[0],
    );

    // Tree rows
    let items: Vec<ListItem> = app
        .visible
        .iter()
        .map(|row| {
            let indent = "  ".repeat(row.level);
            let marker = if row.expandable {
                if app.view.is_expanded(&row.id) {
                    "▾ "
                } else {
                    "▸ "
                }
            } else if row.is_folder {
                "▹ "
            } else {
                "· "
            };
            let mut style = Style::default();
            if !row.is_folder {
                style = style.fg(Color::Gray);
            }
            if app.grabbed.as_deref() == Some(row.id.as_str()) {
                style = style.fg(Color::Yellow).add_modifier(Modifier::ITALIC);
            }
            let history = if row.versions.is_empty() {
                String::new()
            } else {
                format!("  ~{}", row.versions.len())
            };
            ListItem::new(Line::from(Span::styled(
                format!("{indent}{marker}{}{history}", row.name),
                style,
            )))
        })
        .collect();

    let mut state = ListState::default();
    state.select(Some(app.selected));
    let list = List::new(items)
        .block(Block::default().borders(Borders::TOP))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    f.render_stateful_widget(list, chunks[1], &mut state);

    // Status + key help
    let mode = if engine.is_online() { "online" } else { "offline" };
    let pending = engine.store().pending_count().unwrap_or(0);
    let footer = Paragraph::new(vec![
        Line::from(app.status.as_str()),
        Line::from(Span::styled(
            format!(
                "{mode} | {pending} queued | ↑↓ move  ⏎ expand  space grab/drop  r refresh  o toggle online  q quit"
            ),
            Style::default().fg(Color::DarkGray),
        )),
    ]);
    f.render_widget(footer, chunks[2]);
}
