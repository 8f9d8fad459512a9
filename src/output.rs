use crate::diff::DiffType;

/// What a planned change does to its object, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeMarker {
    Create,
    Drop,
    Change,
}

impl ChangeMarker {
    pub fn for_type(diff_type: DiffType) -> Self {
        let name = diff_type.as_str();
        if name.starts_with("create") {
            ChangeMarker::Create
        } else if name.starts_with("drop") {
            ChangeMarker::Drop
        } else {
            ChangeMarker::Change
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ChangeMarker::Create => "+",
            ChangeMarker::Drop => "-",
            ChangeMarker::Change => "~",
        }
    }
}

/// Trait for handling output in a way that works for both CLI and library usage
pub trait OutputHandler: Send + Sync {
    fn success(&self, message: &str);

    fn error(&self, message: &str);

    fn info(&self, message: &str);

    fn warning(&self, message: &str);

    /// Section title
    fn heading(&self, message: &str);

    /// One planned or applied change
    fn item(&self, marker: ChangeMarker, message: &str);

    /// A SQL statement shown under the preceding item
    fn sql(&self, statement: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLevel {
    Success,
    Error,
    Info,
    Warning,
    Heading,
    Item(ChangeMarker),
    Sql,
}

/// Library output handler that collects messages
#[derive(Default)]
pub struct LibraryOutputHandler {
    messages: std::sync::Mutex<Vec<(OutputLevel, String)>>,
}

impl LibraryOutputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_messages(&self) -> Vec<(OutputLevel, String)> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn add_message(&self, level: OutputLevel, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((level, message.to_string()));
    }
}

impl OutputHandler for LibraryOutputHandler {
    fn success(&self, message: &str) {
        self.add_message(OutputLevel::Success, message);
    }

    fn error(&self, message: &str) {
        self.add_message(OutputLevel::Error, message);
    }

    fn info(&self, message: &str) {
        self.add_message(OutputLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.add_message(OutputLevel::Warning, message);
    }

    fn heading(&self, message: &str) {
        self.add_message(OutputLevel::Heading, message);
    }

    fn item(&self, marker: ChangeMarker, message: &str) {
        self.add_message(OutputLevel::Item(marker), message);
    }

    fn sql(&self, statement: &str) {
        self.add_message(OutputLevel::Sql, statement);
    }
}

/// CLI output handler that prints to stdout with colors
#[cfg(feature = "cli")]
pub struct CliOutputHandler;

#[cfg(feature = "cli")]
impl OutputHandler for CliOutputHandler {
    fn success(&self, message: &str) {
        use owo_colors::OwoColorize;
        println!("{} {}", "✓".green(), message);
    }

    fn error(&self, message: &str) {
        use owo_colors::OwoColorize;
        eprintln!("{} {}", "✗".red(), message);
    }

    fn info(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        use owo_colors::OwoColorize;
        println!("{} {}", "⚠".yellow(), message);
    }

    fn heading(&self, message: &str) {
        use owo_colors::OwoColorize;
        println!("\n{}", message.bold());
    }

    fn item(&self, marker: ChangeMarker, message: &str) {
        use owo_colors::OwoColorize;
        let symbol = marker.symbol();
        match marker {
            ChangeMarker::Create => println!("  {} {}", symbol.green().bold(), message),
            ChangeMarker::Drop => println!("  {} {}", symbol.red().bold(), message),
            ChangeMarker::Change => println!("  {} {}", symbol.yellow().bold(), message),
        }
    }

    fn sql(&self, statement: &str) {
        use owo_colors::OwoColorize;
        for line in statement.lines() {
            println!("      {}", line.dimmed());
        }
    }
}
