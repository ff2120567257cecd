use serde::{Deserialize, Serialize};

/// Contact details supplied by the user mid-conversation. An action payload
/// is only dispatchable once name and phone are both present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Customer {
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.phone.trim().is_empty()
    }

    /// Names the contact fields still required before dispatch.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("customer.name");
        }
        if self.phone.trim().is_empty() {
            missing.push("customer.phone");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::Customer;

    #[test]
    fn complete_requires_name_and_phone() {
        let customer = Customer {
            name: "Dana Silva".to_string(),
            phone: "+5511999990000".to_string(),
            email: None,
        };
        assert!(customer.is_complete());
        assert!(customer.missing_fields().is_empty());
    }

    #[test]
    fn whitespace_only_fields_count_as_missing() {
        let customer = Customer { name: "  ".to_string(), phone: String::new(), email: None };
        assert!(!customer.is_complete());
        assert_eq!(customer.missing_fields(), vec!["customer.name", "customer.phone"]);
    }
}
