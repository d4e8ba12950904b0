use colored::Colorize;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, MultiSelect, Password, Select};
use std::io;

use crate::workflow::Prompter;

/// Interactive terminal prompter.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

fn terminal(err: dialoguer::Error) -> io::Error {
    io::Error::other(err)
}

impl Prompter for TerminalPrompter {
    fn input(&mut self, prompt: &str) -> io::Result<String> {
        Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(terminal)
    }

    fn secret(&mut self, prompt: &str) -> io::Result<String> {
        Password::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map_err(terminal)
    }

    fn select(&mut self, prompt: &str, items: &[String]) -> io::Result<usize> {
        Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact()
            .map_err(terminal)
    }

    fn multi_select(&mut self, prompt: &str, items: &[String]) -> io::Result<Vec<usize>> {
        MultiSelect::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .interact()
            .map_err(terminal)
    }

    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(true)
            .interact()
            .map_err(terminal)
    }

    fn notice(&mut self, message: &str) {
        println!("{}", message.cyan());
    }

    fn warn(&mut self, message: &str) {
        println!("{} {}", "!".red().bold(), message.red());
    }
}
