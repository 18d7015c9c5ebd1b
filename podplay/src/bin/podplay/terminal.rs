use std::io::{self, Stdout, Write};

use crossterm::cursor;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Print, PrintStyledContent, Stylize};
use crossterm::terminal::{self, ClearType};
use crossterm::{execute, queue};
use podfeed::{FeedMetadata, SelectionError};
use podplay::{Choice, EpisodeSelector};

const DEFAULT_VISIBLE_ROWS: usize = 15;

/// Liste interactive : flèches pour se déplacer, Entrée pour jouer,
/// Échap, `q` ou Ctrl-C pour annuler.
pub struct TerminalSelector {
    visible_rows: usize,
}

impl TerminalSelector {
    pub fn new() -> Self {
        Self {
            visible_rows: DEFAULT_VISIBLE_ROWS,
        }
    }
}

impl EpisodeSelector for TerminalSelector {
    fn choose(&mut self, metadata: &FeedMetadata, labels: &[String]) -> Result<Choice, SelectionError> {
        if labels.is_empty() {
            return Err(SelectionError::Interaction("no episode to choose from".into()));
        }
        print_header(metadata).map_err(interaction)?;
        self.pick(labels).map_err(interaction)
    }
}

fn interaction(err: io::Error) -> SelectionError {
    SelectionError::Interaction(err.to_string())
}

fn print_header(metadata: &FeedMetadata) -> io::Result<()> {
    let mut out = io::stdout();
    if !metadata.title.is_empty() {
        writeln!(out, "{}", metadata.title.as_str().magenta().bold())?;
    }
    if !metadata.link.is_empty() {
        writeln!(out, "{}", metadata.link.as_str().blue())?;
    }
    writeln!(out)
}

/// Rétablit le terminal même en cas d'erreur
struct RawModeGuard;

impl RawModeGuard {
    fn enable(out: &mut Stdout) -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(out, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

impl TerminalSelector {
    fn pick(&self, labels: &[String]) -> io::Result<Choice> {
        let mut out = io::stdout();
        let _guard = RawModeGuard::enable(&mut out)?;
        let rows = labels.len().min(self.visible_rows.max(1));
        let mut selected = 0usize;
        let mut offset = 0usize;
        let mut drawn = false;

        loop {
            if selected < offset {
                offset = selected;
            } else if selected >= offset + rows {
                offset = selected + 1 - rows;
            }
            if drawn {
                queue!(out, cursor::MoveUp((rows + 1) as u16))?;
            }
            render(&mut out, labels, selected, offset, rows)?;
            drawn = true;

            let Event::Key(KeyEvent {
                code,
                modifiers,
                kind: KeyEventKind::Press,
                ..
            }) = event::read()?
            else {
                continue;
            };
            match code {
                KeyCode::Up | KeyCode::Char('k') => selected = selected.saturating_sub(1),
                KeyCode::Down | KeyCode::Char('j') => selected = (selected + 1).min(labels.len() - 1),
                KeyCode::PageUp => selected = selected.saturating_sub(rows),
                KeyCode::PageDown => selected = (selected + rows).min(labels.len() - 1),
                KeyCode::Home => selected = 0,
                KeyCode::End => selected = labels.len() - 1,
                KeyCode::Enter => return Ok(Choice::Selected(labels[selected].clone())),
                KeyCode::Esc | KeyCode::Char('q') => return Ok(Choice::Cancelled),
                KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(Choice::Cancelled);
                }
                _ => {}
            }
        }
    }
}

fn render(out: &mut Stdout, labels: &[String], selected: usize, offset: usize, rows: usize) -> io::Result<()> {
    let width = terminal::size().map(|(cols, _)| usize::from(cols)).unwrap_or(80).max(8);
    for (index, label) in labels.iter().enumerate().skip(offset).take(rows) {
        let text = truncate(label, width - 4);
        queue!(out, cursor::MoveToColumn(0), terminal::Clear(ClearType::CurrentLine))?;
        if index == selected {
            queue!(out, PrintStyledContent(format!("> {text}").cyan().bold()))?;
        } else {
            queue!(out, Print(format!("  {text}")))?;
        }
        queue!(out, Print("\r\n"))?;
    }
    let hint = format!(
        "{}/{}  ↑/↓ move, Enter play, Esc cancel",
        selected + 1,
        labels.len()
    );
    queue!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(ClearType::CurrentLine),
        PrintStyledContent(hint.dark_grey()),
        Print("\r\n")
    )?;
    out.flush()
}

fn truncate(label: &str, max_chars: usize) -> String {
    if label.chars().count() <= max_chars {
        return label.to_string();
    }
    let mut short: String = label.chars().take(max_chars.saturating_sub(1)).collect();
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_labels_are_shortened() {
        assert_eq!(truncate("Intro", 10), "Intro");
        assert_eq!(truncate("Épisode très long", 8), "Épisode…");
    }
}
