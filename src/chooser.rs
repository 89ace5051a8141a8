use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::settings::SettingsStore;

/// What to do with a torrent the user opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChooserAction {
    Play = 1,
    AddAndPlay = 2,
    Add = 3,
}

impl ChooserAction {
    pub const ALL: [ChooserAction; 3] = [Self::Play, Self::AddAndPlay, Self::Add];

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Play),
            2 => Some(Self::AddAndPlay),
            3 => Some(Self::Add),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ChooserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Play => "play",
            Self::AddAndPlay => "add-and-play",
            Self::Add => "add",
        })
    }
}

impl FromStr for ChooserAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "play" | "1" => Ok(Self::Play),
            "add-and-play" | "2" => Ok(Self::AddAndPlay),
            "add" | "3" => Ok(Self::Add),
            other => anyhow::bail!("unknown action `{other}`, expected play, add-and-play or add"),
        }
    }
}

/// The remembered action, unless the caller insists on asking.
pub fn resolve(settings: &dyn SettingsStore, force_choose: bool) -> Option<ChooserAction> {
    if force_choose {
        return None;
    }
    ChooserAction::from_code(settings.chooser_action())
}

/// Store `action` as the default when the user asked to remember it.
pub fn record(settings: &dyn SettingsStore, action: ChooserAction, remember: bool) -> Result<()> {
    if remember {
        settings.set_chooser_action(action.code())?;
    }
    Ok(())
}
