//! Command router: normalises both command layouts into `(name, options)`.

use tracing::debug;

use super::{CommandInvocation, CommandOption, CommandShape, OptionValue, UNIT_OPTION};

/// A command after layout unwrapping: the action name and its options.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedCommand {
    pub name: String,
    pub options: Vec<CommandOption>,
}

impl RoutedCommand {
    /// Value of the `unit` option, if given as a string.
    pub fn unit(&self) -> Option<&str> {
        self.options.iter().find_map(|option| match &option.value {
            OptionValue::String(value) if option.name == UNIT_OPTION => Some(value.as_str()),
            _ => None,
        })
    }
}

pub struct Router {
    shape: CommandShape,
}

impl Router {
    pub fn new(shape: CommandShape) -> Self {
        Self { shape }
    }

    /// Unwrap one level when the invocation is the configured parent command
    /// carrying a single child option; pass anything else through unchanged.
    pub fn route(&self, invocation: CommandInvocation) -> RoutedCommand {
        let CommandInvocation { name, mut options } = invocation;
        match &self.shape {
            CommandShape::Single { parent } if *parent == name && options.len() == 1 => {
                let child = options.remove(0);
                let options = match child.value {
                    OptionValue::SubCommand(options) => options,
                    _ => Vec::new(),
                };
                debug!(%parent, command = %child.name, "routed sub-command");
                RoutedCommand { name: child.name, options }
            }
            _ => RoutedCommand { name, options },
        }
    }
}
