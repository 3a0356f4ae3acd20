use std::fmt::Debug;
use std::hash::Hash;

/// Trait for labels returned by a node's post phase to select the next successor.
///
/// `Default::default()` is the implicit label used when post returns `None`.
pub trait ActionType: Clone + Debug + Default + Eq + Hash + Send + Sync + 'static {
    /// Get the name of this action
    fn name(&self) -> &str;
}

/// Default action type for simple workflows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum DefaultAction {
    /// Implicit label followed when post returns no action
    #[default]
    Default,
    /// Next node in sequence
    Next,
    /// Error handler
    Error,
    /// Custom named action
    Custom(String),
}

impl DefaultAction {
    /// Create an action from a name, mapping the reserved names onto their variants.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.as_str() {
            "default" => Self::Default,
            "next" => Self::Next,
            "error" => Self::Error,
            _ => Self::Custom(name),
        }
    }
}

impl From<&str> for DefaultAction {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for DefaultAction {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl ActionType for DefaultAction {
    fn name(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Next => "next",
            Self::Error => "error",
            Self::Custom(name) => name,
        }
    }
}
