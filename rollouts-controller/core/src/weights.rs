use std::fmt;

/// A service receiving a share of traffic alongside the canary, e.g. an
/// experiment's ephemeral service.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WeightDestination {
    pub service_name: String,
    pub port: Option<u16>,
    pub weight: i32,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum WeightError {
    #[error("weight {weight} for {target} must be between 0 and 100")]
    OutOfRange { target: String, weight: i32 },

    #[error("canary weight {canary} and additional weights {additional} exceed 100")]
    Oversubscribed { canary: i32, additional: i32 },
}

/// A validated traffic split: the canary, any additional destinations, and the
/// stable remainder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightSplit<'a> {
    pub canary: i32,
    pub stable: i32,
    pub additional: &'a [WeightDestination],
}

// === impl WeightDestination ===

impl WeightDestination {
    pub fn new(service_name: impl Into<String>, weight: i32) -> Self {
        Self {
            service_name: service_name.into(),
            port: None,
            weight,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

impl fmt::Display for WeightDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}={}", self.service_name, port, self.weight),
            None => write!(f, "{}={}", self.service_name, self.weight),
        }
    }
}

// === impl WeightSplit ===

impl<'a> WeightSplit<'a> {
    /// Computes the stable weight. Additional destinations are debited from
    /// the canary's share, never the stable's: `stable = 100 - canary - sum(additional)`.
    pub fn new(canary: i32, additional: &'a [WeightDestination]) -> Result<Self, WeightError> {
        check_range("canary", canary)?;
        let mut sum = 0;
        for dest in additional {
            check_range(&dest.service_name, dest.weight)?;
            sum += dest.weight;
        }
        if canary + sum > 100 {
            return Err(WeightError::Oversubscribed {
                canary,
                additional: sum,
            });
        }
        Ok(Self {
            canary,
            stable: 100 - canary - sum,
            additional,
        })
    }

    /// The desired weight of the named additional destination, if any.
    pub fn additional_weight(&self, service_name: &str) -> Option<i32> {
        self.additional
            .iter()
            .find(|d| d.service_name == service_name)
            .map(|d| d.weight)
    }

    pub fn total(&self) -> i32 {
        self.canary + self.stable + self.additional.iter().map(|d| d.weight).sum::<i32>()
    }
}

fn check_range(target: &str, weight: i32) -> Result<(), WeightError> {
    if !(0..=100).contains(&weight) {
        return Err(WeightError::OutOfRange {
            target: target.to_string(),
            weight,
        });
    }
    Ok(())
}
