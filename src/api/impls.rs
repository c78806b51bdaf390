use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::bail;

use super::*;

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Open => "Open",
            Self::Resolved => "Resolved",
            Self::Locked => "Locked",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Open" => Ok(Self::Open),
            "Resolved" => Ok(Self::Resolved),
            "Locked" => Ok(Self::Locked),
            "Cancelled" => Ok(Self::Cancelled),
            e => bail!("Couldn't deserialize to Status: {}", e),
        }
    }
}
impl Display for PredictionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.as_bytes()))
    }
}
impl FromStr for PredictionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.is_empty() {
            bail!("Prediction id can't be empty");
        }
        Ok(Self::new(bytes))
    }
}
impl TryFrom<String> for PredictionId {
    type Error = anyhow::Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::from_str(s.as_str())
    }
}
impl From<PredictionId> for String {
    fn from(id: PredictionId) -> Self {
        id.to_string()
    }
}
impl From<&str> for PredictionId {
    fn from(name: &str) -> Self {
        Self::new(name.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_round_trips_through_db_text() {
        for status in [
            Status::Open,
            Status::Resolved,
            Status::Locked,
            Status::Cancelled,
        ] {
            assert_eq!(Status::from_str(&status.to_string()).unwrap(), status);
        }
        Status::from_str("Paused").unwrap_err();
    }

    #[test]
    fn prediction_id_is_hex_on_the_wire() {
        let id = PredictionId::from("M");
        assert_eq!(id.to_string(), "4d");
        assert_eq!(PredictionId::from_str("4d").unwrap(), id);
        PredictionId::from_str("").unwrap_err();
        PredictionId::from_str("zz").unwrap_err();
    }
}
