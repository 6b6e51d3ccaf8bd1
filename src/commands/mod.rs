// ABOUTME: Command implementations invoked by the CLI
// ABOUTME: Exports the migrate command that runs the selected phases

pub mod migrate;

pub use migrate::migrate;
