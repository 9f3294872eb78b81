use crate::error::Error;

use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// One of the two generator ports
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Port {
    Port0,
    Port1,
}

impl Port {
    pub const ALL: [Port; 2] = [Port::Port0, Port::Port1];

    pub fn index(self) -> usize {
        match self {
            Port::Port0 => 0,
            Port::Port1 => 1,
        }
    }
}

impl TryFrom<usize> for Port {
    type Error = Error;
    fn try_from(n: usize) -> Result<Self, Self::Error> {
        match n {
            0 => Ok(Port::Port0),
            1 => Ok(Port::Port1),
            _ => Err(Error::InvalidArgument(format!("no such port: {}", n))),
        }
    }
}

impl FromStr for Port {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // acceptable format: 0, nf0, ens1f0, port0
        lazy_static::lazy_static! {
            static ref RE: regex::Regex =
                regex::Regex::new(r"(?i)^\s*(?:nf|ens1f|port)?([0-9]+)\s*$").unwrap();
        }

        let n = RE
            .captures(s)
            .and_then(|caps| caps.get(1).unwrap().as_str().parse::<usize>().ok())
            .ok_or_else(|| Error::InvalidArgument(format!("invalid port: {}", s)))?;
        Port::try_from(n)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nf{}", self.index())
    }
}

/// A value for each port
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PerPort<T>([T; 2]);

impl<T> PerPort<T> {
    pub fn new(port0: T, port1: T) -> Self {
        PerPort([port0, port1])
    }

    pub fn from_fn(mut f: impl FnMut(Port) -> T) -> Self {
        PerPort([f(Port::Port0), f(Port::Port1)])
    }

    pub fn try_from_fn<E>(mut f: impl FnMut(Port) -> Result<T, E>) -> Result<Self, E> {
        Ok(PerPort([f(Port::Port0)?, f(Port::Port1)?]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Port, &T)> {
        Port::ALL.into_iter().zip(self.0.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Port, &mut T)> {
        Port::ALL.into_iter().zip(self.0.iter_mut())
    }

    pub fn map<U>(self, mut f: impl FnMut(Port, T) -> U) -> PerPort<U> {
        let [a, b] = self.0;
        PerPort([f(Port::Port0, a), f(Port::Port1, b)])
    }
}

impl<T> Index<Port> for PerPort<T> {
    type Output = T;
    fn index(&self, port: Port) -> &T {
        &self.0[port.index()]
    }
}

impl<T> IndexMut<Port> for PerPort<T> {
    fn index_mut(&mut self, port: Port) -> &mut T {
        &mut self.0[port.index()]
    }
}

impl<T> From<[T; 2]> for PerPort<T> {
    fn from(a: [T; 2]) -> Self {
        PerPort(a)
    }
}
