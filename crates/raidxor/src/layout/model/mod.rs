//! Units, their roles, and the XOR equations relating them.

#[cfg(test)]
mod model_tests;

use std::fmt;
use std::str::FromStr;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::layout::bits::Bits;

pub type UnitIndex = usize;
pub type TempIndex = usize;

/// Role of a member device within the array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Data,
    Redundant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Data => "data",
            Self::Redundant => "redundant",
        })
    }
}

/// One term of an XOR equation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    Unit(UnitIndex),
    Temp(TempIndex),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit(u) => write!(f, "{u}"),
            Self::Temp(t) => write!(f, "t{t}"),
        }
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parsed = match s.strip_prefix('t') {
            Some(rest) => rest.parse().map(Self::Temp),
            None => s.parse().map(Self::Unit),
        };
        parsed.map_err(|_| Error::Layout(format!("bad equation term {s:?}")))
    }
}

/// Ordered list of sources whose XOR yields a target buffer.
///
/// Used both as an encoding (redundant unit content) and as a decoding
/// (reconstruction of a lost data unit).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Equation(Vec<Source>);

pub type Encoding = Equation;
pub type Decoding = Equation;

impl Equation {
    #[must_use]
    pub const fn new(sources: Vec<Source>) -> Self {
        Self(sources)
    }

    /// `of_units` builds an equation referencing the given units in order.
    #[must_use]
    pub fn of_units(units: impl IntoIterator<Item = UnitIndex>) -> Self {
        Self(units.into_iter().map(Source::Unit).collect())
    }

    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `temps` iterates the temporaries referenced directly.
    pub fn temps(&self) -> impl Iterator<Item = TempIndex> + '_ {
        self.0.iter().filter_map(|s| match s {
            Source::Temp(t) => Some(*t),
            Source::Unit(_) => None,
        })
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("^")?;
            }
            write!(f, "{s}")?;
        }
        Ok(())
    }
}

impl FromStr for Equation {
    type Err = Error;

    /// Parses `"0^1^t2"`: unit indices and `t`-prefixed temporaries joined by `^`.
    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::Layout("empty equation".into()));
        }
        s.split('^').map(str::parse::<Source>).collect::<Result<Vec<_>>>().map(Self)
    }
}

/// One member device slot.
#[derive(Clone, Debug)]
pub struct Unit {
    name: String,
    role: Role,
    faulty: bool,
    encoding: Option<Encoding>,
    decoding: Option<Decoding>,
}

impl Unit {
    #[must_use]
    pub fn data(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: Role::Data,
            faulty: false,
            encoding: None,
            decoding: None,
        }
    }

    #[must_use]
    pub fn redundant(name: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            name: name.into(),
            role: Role::Redundant,
            faulty: false,
            encoding: Some(encoding),
            decoding: None,
        }
    }

    #[must_use]
    pub fn with_decoding(mut self, decoding: Decoding) -> Self {
        self.decoding = Some(decoding);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub const fn is_faulty(&self) -> bool {
        self.faulty
    }

    #[must_use]
    pub const fn encoding(&self) -> Option<&Encoding> {
        self.encoding.as_ref()
    }

    #[must_use]
    pub const fn decoding(&self) -> Option<&Decoding> {
        self.decoding.as_ref()
    }
}

/// The array's units, shared temporaries, and derived orderings.
///
/// Roles and encodings are fixed at construction; fault flags and decodings
/// change at runtime under the engine lock.
#[derive(Clone, Debug)]
pub struct LayoutModel {
    units: Vec<Unit>,
    temps: Vec<Equation>,
    temp_order: Vec<TempIndex>,
    data_units: Vec<UnitIndex>,
}

impl LayoutModel {
    /// `new` validates units and temporaries and computes the temporary evaluation order.
    ///
    /// # Errors
    /// Returns [`Error::Layout`] when a reference is dangling, an encoding depends on a
    /// redundant unit, a decoding depends on its own unit, or temporaries form a cycle.
    pub fn new(units: Vec<Unit>, temps: Vec<Equation>) -> Result<Self> {
        let data_units: Vec<UnitIndex> = units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.role == Role::Data)
            .map(|(i, _)| i)
            .collect();
        if data_units.is_empty() {
            return Err(Error::Layout("array needs at least one data unit".into()));
        }

        let mut model = Self {
            units,
            temps,
            temp_order: Vec::new(),
            data_units,
        };

        for (t, eq) in model.temps.iter().enumerate() {
            if eq.is_empty() {
                return Err(Error::Layout(format!("temporary t{t} is empty")));
            }
            model.check_refs(eq, &format!("temporary t{t}"))?;
        }
        model.temp_order = model.topo_order()?;

        for (i, unit) in model.units.iter().enumerate() {
            match unit.role {
                Role::Data => {
                    if unit.encoding.is_some() {
                        return Err(Error::Layout(format!("data unit {i} has an encoding")));
                    }
                }
                Role::Redundant => {
                    let Some(enc) = unit.encoding.as_ref().filter(|e| !e.is_empty()) else {
                        return Err(Error::Layout(format!(
                            "redundant unit {i} has no encoding"
                        )));
                    };
                    model.check_refs(enc, &format!("encoding of unit {i}"))?;
                    let used = model.referenced_units(enc);
                    if let Some(r) = used.ones().find(|u| model.units[*u].role != Role::Data) {
                        return Err(Error::Layout(format!(
                            "encoding of unit {i} depends on redundant unit {r}"
                        )));
                    }
                }
            }
            if let Some(dec) = unit.decoding.as_ref() {
                model.check_decoding(i, dec)?;
            }
        }

        Ok(model)
    }

    /// `single_parity` builds `data` data units plus one redundant unit holding their XOR.
    ///
    /// Every data unit gets the decoding `parity ^ (all other data units)`.
    ///
    /// # Errors
    /// Returns [`Error::Layout`] when `data` is zero.
    pub fn single_parity(data: usize) -> Result<Self> {
        let parity = data;
        let mut units: Vec<Unit> = (0..data)
            .map(|i| {
                let others = (0..data).filter(|j| *j != i);
                Unit::data(format!("d{i}"))
                    .with_decoding(Equation::of_units(std::iter::once(parity).chain(others)))
            })
            .collect();
        units.push(Unit::redundant("p", Equation::of_units(0..data)));
        Self::new(units, Vec::new())
    }

    #[must_use]
    pub fn n_units(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    #[must_use]
    pub fn unit(&self, i: UnitIndex) -> Option<&Unit> {
        self.units.get(i)
    }

    #[must_use]
    pub fn temps(&self) -> &[Equation] {
        &self.temps
    }

    /// `temp_order` lists temporaries so that each appears after everything it references.
    #[must_use]
    pub fn temp_order(&self) -> &[TempIndex] {
        &self.temp_order
    }

    /// `data_units` lists data unit indices in strip order.
    #[must_use]
    pub fn data_units(&self) -> &[UnitIndex] {
        &self.data_units
    }

    pub fn redundant_units(&self) -> impl Iterator<Item = UnitIndex> + '_ {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.role == Role::Redundant)
            .map(|(i, _)| i)
    }

    #[must_use]
    pub fn is_faulty(&self, i: UnitIndex) -> bool {
        self.units.get(i).is_some_and(Unit::is_faulty)
    }

    pub fn faulty_units(&self) -> impl Iterator<Item = UnitIndex> + '_ {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.faulty)
            .map(|(i, _)| i)
    }

    /// `mark_faulty` flags a unit and drops every decoding that depended on it.
    ///
    /// # Returns
    /// `true` when the unit was not already faulty.
    ///
    /// # Errors
    /// Returns [`Error::Layout`] for an unknown unit.
    pub fn mark_faulty(&mut self, unit: UnitIndex) -> Result<bool> {
        let Some(u) = self.units.get_mut(unit) else {
            return Err(Error::Layout(format!("unknown unit {unit}")));
        };
        if u.faulty {
            return Ok(false);
        }
        u.faulty = true;
        warn!(unit, name = %u.name, role = %u.role, "unit marked faulty");
        self.invalidate_decoding(unit);
        Ok(true)
    }

    /// `invalidate_decoding` drops every decoding that references `unit`, directly or
    /// through a temporary.
    ///
    /// # Returns
    /// The data units whose decoding was dropped.
    pub fn invalidate_decoding(&mut self, unit: UnitIndex) -> Vec<UnitIndex> {
        let mut dropped = Vec::new();
        for d in 0..self.units.len() {
            let stale = self.units[d]
                .decoding
                .as_ref()
                .is_some_and(|dec| self.referenced_units(dec).get(unit));
            if stale {
                self.units[d].decoding = None;
                warn!(unit = d, lost = unit, "unit needs new decoding");
                dropped.push(d);
            }
        }
        dropped
    }

    /// `set_decoding` installs a decoding for a data unit.
    ///
    /// # Errors
    /// Returns [`Error::Layout`] when the unit is not a data unit, the decoding references
    /// unknown sources or its own unit, or depends on a unit that is already faulty.
    pub fn set_decoding(&mut self, unit: UnitIndex, decoding: Decoding) -> Result<()> {
        self.check_decoding(unit, &decoding)?;
        if let Some(f) = self
            .referenced_units(&decoding)
            .ones()
            .find(|u| self.is_faulty(*u))
        {
            return Err(Error::Layout(format!(
                "decoding for unit {unit} depends on faulty unit {f}"
            )));
        }
        info!(unit, %decoding, "decoding installed");
        self.units[unit].decoding = Some(decoding);
        Ok(())
    }

    /// `usable_decoding` returns the unit's decoding if none of its dependencies is faulty.
    #[must_use]
    pub fn usable_decoding(&self, unit: UnitIndex) -> Option<&Decoding> {
        let dec = self.units.get(unit)?.decoding.as_ref()?;
        let deps = self.referenced_units(dec);
        if deps.ones().any(|u| self.is_faulty(u)) {
            None
        } else {
            Some(dec)
        }
    }

    /// `referenced_units` returns the set of units an equation reads, following temporaries.
    #[must_use]
    pub fn referenced_units(&self, eq: &Equation) -> Bits {
        let mut set = Bits::zero(self.units.len());
        let mut seen = Bits::zero(self.temps.len());
        let mut stack: Vec<Source> = eq.sources().to_vec();
        while let Some(src) = stack.pop() {
            match src {
                Source::Unit(u) => set.set(u, true),
                Source::Temp(t) => {
                    if !seen.get(t) {
                        seen.set(t, true);
                        if let Some(teq) = self.temps.get(t) {
                            stack.extend_from_slice(teq.sources());
                        }
                    }
                }
            }
        }
        set
    }

    /// `expand` rewrites an equation as a GF(2) row over data units.
    ///
    /// Redundant units are replaced by their encodings and temporaries by their sources;
    /// terms that appear an even number of times cancel.
    #[must_use]
    pub fn expand(&self, eq: &Equation) -> Bits {
        let mut row = Bits::zero(self.units.len());
        for src in eq.sources() {
            row ^= &self.expand_source(*src);
        }
        row
    }

    fn expand_source(&self, src: Source) -> Bits {
        match src {
            Source::Unit(u) => match self.units.get(u) {
                Some(unit) => match (&unit.role, &unit.encoding) {
                    (Role::Redundant, Some(enc)) => self.expand(enc),
                    _ => Bits::unit(self.units.len(), u),
                },
                None => Bits::zero(self.units.len()),
            },
            Source::Temp(t) => self
                .temps
                .get(t)
                .map_or_else(|| Bits::zero(self.units.len()), |teq| self.expand(teq)),
        }
    }

    /// `temps_for` returns every temporary the equations need, in evaluation order.
    #[must_use]
    pub fn temps_for<'a>(&self, eqs: impl IntoIterator<Item = &'a Equation>) -> Vec<TempIndex> {
        let mut needed = Bits::zero(self.temps.len());
        let mut stack: Vec<TempIndex> = eqs.into_iter().flat_map(Equation::temps).collect();
        while let Some(t) = stack.pop() {
            if needed.get(t) {
                continue;
            }
            needed.set(t, true);
            if let Some(teq) = self.temps.get(t) {
                stack.extend(teq.temps());
            }
        }
        self.temp_order
            .iter()
            .copied()
            .filter(|t| needed.get(*t))
            .collect()
    }

    fn check_refs(&self, eq: &Equation, what: &str) -> Result<()> {
        for src in eq.sources() {
            let ok = match src {
                Source::Unit(u) => *u < self.units.len(),
                Source::Temp(t) => *t < self.temps.len(),
            };
            if !ok {
                return Err(Error::Layout(format!("{what} references unknown {src}")));
            }
        }
        Ok(())
    }

    fn check_decoding(&self, unit: UnitIndex, dec: &Decoding) -> Result<()> {
        match self.units.get(unit) {
            Some(u) if u.role == Role::Data => {}
            Some(_) => {
                return Err(Error::Layout(format!(
                    "unit {unit} is redundant; only data units take decodings"
                )));
            }
            None => return Err(Error::Layout(format!("unknown unit {unit}"))),
        }
        if dec.is_empty() {
            return Err(Error::Layout(format!("decoding for unit {unit} is empty")));
        }
        self.check_refs(dec, &format!("decoding of unit {unit}"))?;
        if self.referenced_units(dec).get(unit) {
            return Err(Error::Layout(format!(
                "decoding for unit {unit} depends on the unit itself"
            )));
        }
        Ok(())
    }

    /// Depth-first topological sort of temporaries; a back edge is a cycle.
    fn topo_order(&self) -> Result<Vec<TempIndex>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut marks = vec![Mark::New; self.temps.len()];
        let mut order = Vec::with_capacity(self.temps.len());

        for root in 0..self.temps.len() {
            if marks[root] != Mark::New {
                continue;
            }
            // (temp, index of next source to visit)
            let mut stack: Vec<(TempIndex, usize)> = vec![(root, 0)];
            marks[root] = Mark::Active;
            while let Some((t, next)) = stack.last_mut() {
                let t = *t;
                let deps: Vec<TempIndex> = self.temps[t].temps().collect();
                if let Some(&dep) = deps.get(*next) {
                    *next += 1;
                    match marks[dep] {
                        Mark::New => {
                            marks[dep] = Mark::Active;
                            stack.push((dep, 0));
                        }
                        Mark::Active => {
                            return Err(Error::Layout(format!(
                                "temporaries form a cycle through t{dep}"
                            )));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[t] = Mark::Done;
                    order.push(t);
                    stack.pop();
                }
            }
        }
        Ok(order)
    }
}
