pub mod fs;
pub mod path;
pub mod sha;

mod command;
pub use command::{
    command_output, command_output_as_string, run_command, ProbeContext, DEFAULT_COMMAND_TIMEOUT,
};
