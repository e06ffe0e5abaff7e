use std::fmt;

use crate::cache::{Cache, LineState};
use crate::layout::model::{Equation, LayoutModel, Role, UnitIndex};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineStatus {
    pub index: usize,
    pub state: LineState,
    pub strip: Option<u64>,
    pub queued: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitStatus {
    pub index: UnitIndex,
    pub name: String,
    pub role: Role,
    pub faulty: bool,
    pub encoding: Option<Equation>,
    /// The decoding recovery would use right now.
    pub decoding: Option<Equation>,
}

/// Read-only snapshot of line states and unit fault flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayStatus {
    pub lines: Vec<LineStatus>,
    pub units: Vec<UnitStatus>,
    pub waiting: usize,
    pub allocated_bytes: usize,
    pub stopping: bool,
    pub halted: Option<String>,
}

impl ArrayStatus {
    pub(crate) fn capture(
        cache: &Cache,
        model: &LayoutModel,
        stopping: bool,
        halted: Option<&str>,
    ) -> Self {
        let lines = cache
            .lines()
            .iter()
            .enumerate()
            .map(|(index, l)| LineStatus {
                index,
                state: l.state(),
                strip: l.strip(),
                queued: l.queued(),
            })
            .collect();
        let units = model
            .units()
            .iter()
            .enumerate()
            .map(|(index, u)| UnitStatus {
                index,
                name: u.name().to_string(),
                role: u.role(),
                faulty: u.is_faulty(),
                encoding: u.encoding().cloned(),
                decoding: model.usable_decoding(index).cloned(),
            })
            .collect();
        Self {
            lines,
            units,
            waiting: cache.n_waiting(),
            allocated_bytes: cache.allocated_bytes(),
            stopping,
            halted: halted.map(str::to_string),
        }
    }

    pub fn faulty_units(&self) -> impl Iterator<Item = UnitIndex> + '_ {
        self.units.iter().filter(|u| u.faulty).map(|u| u.index)
    }

    /// `count` returns how many lines are in `state`.
    #[must_use]
    pub fn count(&self, state: LineState) -> usize {
        self.lines.iter().filter(|l| l.state == state).count()
    }
}

impl fmt::Display for ArrayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.halted, self.stopping) {
            (Some(reason), _) => writeln!(f, "array: HALTED ({reason})")?,
            (None, true) => writeln!(f, "array: stopping")?,
            (None, false) => writeln!(f, "array: running")?,
        }
        writeln!(
            f,
            "waiting submitters: {}, buffer bytes: {}",
            self.waiting, self.allocated_bytes
        )?;
        writeln!(f, "units:")?;
        for u in &self.units {
            let health = if u.faulty { "FAULTY" } else { "ok" };
            write!(
                f,
                "  {:>3} {:<8} {:<9} {:<6}",
                u.index,
                u.name,
                u.role.to_string(),
                health
            )?;
            match (u.role, &u.encoding, &u.decoding) {
                (Role::Redundant, Some(enc), _) => writeln!(f, " = {enc}")?,
                (Role::Data, _, Some(dec)) => writeln!(f, " <- {dec}")?,
                (Role::Data, _, None) => writeln!(f, " (no decoding)")?,
                _ => writeln!(f)?,
            }
        }
        writeln!(f, "lines:")?;
        for l in &self.lines {
            match l.strip {
                Some(strip) => writeln!(
                    f,
                    "  {:>3} {:<9} strip {strip} queued {}",
                    l.index,
                    l.state.to_string(),
                    l.queued
                )?,
                None => writeln!(f, "  {:>3} {}", l.index, l.state)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LineShape;
    use crate::layout::geometry::Geometry;

    #[test]
    fn snapshot_renders_units_and_lines() {
        let mut model = LayoutModel::single_parity(2).expect("layout");
        model.mark_faulty(1).expect("mark");
        let geom = Geometry::new(4, 1, 2, 16).expect("geometry");
        let mut cache = Cache::new(2, LineShape::of(&model, &geom), None).expect("cache");
        cache.make_ready(0).expect("ready");
        cache.bind(0, 8).expect("bind");

        let status = ArrayStatus::capture(&cache, &model, false, None);
        assert_eq!(status.faulty_units().collect::<Vec<_>>(), vec![1]);
        assert_eq!(status.count(LineState::LoadMe), 1);
        assert_eq!(status.count(LineState::Clean), 1);

        let text = status.to_string();
        assert!(text.starts_with("array: running"));
        assert!(text.contains("FAULTY"));
        assert!(text.contains("LOAD_ME"));
        assert!(text.contains("strip 8"));
        assert!(text.contains("= 0^1"));
    }
}
