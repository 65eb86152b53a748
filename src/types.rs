// src/types.rs
use std::path::PathBuf;
use std::str::FromStr;

use crate::drivers::{ConfigChange, ScopeView, StatisticsRecord};

// Console -> engine
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlCommand {
    Change(ConfigChange),
    Calibrate,
    // raw samples of the next full window go to a snapshot file
    Snapshot,
    SavePlot,
    Status,
    Quit,
}

impl FromStr for ControlCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| "empty command".to_owned())?;
        let arg = words.next();
        if let Some(extra) = words.next() {
            return Err(format!("unexpected argument {extra:?}"));
        }
        let number = |name: &str| -> Result<f64, String> {
            let text = arg.ok_or_else(|| format!("{name} needs a value"))?;
            text.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("{name}: {text:?} is not a number"))
        };
        let flag = |cmd: ControlCommand| match arg {
            None => Ok(cmd),
            Some(a) => Err(format!("{verb} takes no argument, got {a:?}")),
        };
        match verb.to_ascii_lowercase().as_str() {
            "rate" => Ok(Self::Change(ConfigChange::SampleRate(number("rate")?))),
            "timebase" | "tb" => Ok(Self::Change(ConfigChange::TimeBase(number("timebase")?))),
            "cutoff" if arg.is_some_and(|a| a.eq_ignore_ascii_case("nyquist")) => {
                Ok(Self::Change(ConfigChange::CutoffAtNyquist))
            }
            "cutoff" => Ok(Self::Change(ConfigChange::Cutoff(number("cutoff")?))),
            "trigger" => flag(Self::Change(ConfigChange::ToggleTriggering)),
            "filtered" => flag(Self::Change(ConfigChange::TogglePlotFiltered)),
            "pause" => flag(Self::Change(ConfigChange::TogglePause)),
            "log" => flag(Self::Change(ConfigChange::ToggleFileLogging)),
            "calibrate" | "cal" => flag(Self::Calibrate),
            "snapshot" | "snap" => flag(Self::Snapshot),
            "plot" => flag(Self::SavePlot),
            "status" => flag(Self::Status),
            "quit" | "exit" | "q" => flag(Self::Quit),
            other => Err(format!("unknown command {other:?}")),
        }
    }
}

// Engine -> front end
#[derive(Clone, Debug)]
pub enum ScopeEvent {
    Log(String),
    Statistics(StatisticsRecord),
    View(ScopeView),
    LoggingStatus(bool),
    SnapshotSaved(PathBuf),
    PlotSaved(PathBuf),
    Calibrated(Vec<f64>),
    Stopped,
}
