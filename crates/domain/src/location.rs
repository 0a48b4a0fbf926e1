//! Fulfillment locations.

use common::LocationId;
use serde::{Deserialize, Serialize};

use crate::order::{Address, GridPoint};

/// A remote fulfillment service able to hold stock for order lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLocation {
    pub id: LocationId,
    pub name: String,
    pub address: Address,
    /// Base URL of the location's HTTP API, without a trailing slash.
    pub api_url: String,
}

impl OrderLocation {
    pub fn new(
        id: LocationId,
        name: impl Into<String>,
        address: Address,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            address,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn grid(&self) -> GridPoint {
        self.address.grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_trailing_slash_is_trimmed() {
        let location = OrderLocation::new(
            LocationId::new(7),
            "North",
            Address::new("PT", "Braga", GridPoint::new(1, 9)),
            "http://north.local:8080/",
        );
        assert_eq!(location.api_url, "http://north.local:8080");
        assert_eq!(location.grid(), GridPoint::new(1, 9));
    }
}
