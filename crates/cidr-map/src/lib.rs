pub use cidr::IpCidr;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A little helper struct to reduce the boilerplate when
/// checking against a list of cidrs
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct CidrSet(Vec<IpCidr>);

impl CidrSet {
    pub fn new(set: Vec<IpCidr>) -> Self {
        Self(set)
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        for entry in &self.0 {
            if entry.contains(&ip) {
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn contains() {
        let set = CidrSet::new(vec![
            "10.0.0.0/8".parse().unwrap(),
            "192.168.1.0/24".parse().unwrap(),
        ]);
        k9::assert_equal!(set.contains("10.1.2.3".parse().unwrap()), true);
        k9::assert_equal!(set.contains("192.168.1.42".parse().unwrap()), true);
        k9::assert_equal!(set.contains("8.8.8.8".parse().unwrap()), false);
    }

    #[test]
    fn empty_set_rejects_everything() {
        let set = CidrSet::default();
        k9::assert_equal!(set.is_empty(), true);
        k9::assert_equal!(set.contains("1.2.3.4".parse().unwrap()), false);
    }
}
