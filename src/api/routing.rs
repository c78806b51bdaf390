use anyhow::{bail, Result};

use super::*;

/// Routing data attached to a token transfer into custody: the prediction
/// id bytes followed by a single outcome byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingData {
    pub prediction: PredictionId,
    pub outcome: OutcomeId,
}

impl RoutingData {
    pub fn encode(&self) -> Vec<u8> {
        let mut data = self.prediction.as_bytes().to_vec();
        data.push(self.outcome);
        data
    }
    pub fn decode(data: &[u8]) -> Result<Self> {
        match data.split_last() {
            Some((outcome, id)) if !id.is_empty() => Ok(Self {
                prediction: PredictionId::new(id.to_vec()),
                outcome: *outcome,
            }),
            _ => bail!(
                "Routing data needs a prediction id and an outcome, got {} bytes",
                data.len()
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_id_and_trailing_outcome() {
        let routing = RoutingData::decode(&[0xaa, 0xbb, 2]).unwrap();
        assert_eq!(routing.prediction, PredictionId::new(vec![0xaa, 0xbb]));
        assert_eq!(routing.outcome, 2);
        assert_eq!(routing.encode(), vec![0xaa, 0xbb, 2]);
    }

    #[test]
    fn rejects_missing_prediction_id() {
        RoutingData::decode(&[]).unwrap_err();
        RoutingData::decode(&[1]).unwrap_err();
    }
}
