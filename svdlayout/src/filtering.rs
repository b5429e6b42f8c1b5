//! Selection of devices from a catalog
use regex::Regex;

use crate::catalog::SourceDescriptor;

/// Device selection applied to a [`crate::Catalog`]
#[derive(Default)]
pub struct Filters {
    /// Filter based on device name
    pub(crate) device: Option<ItemFilter<String>>,
    /// Filter based on declared vendor. Devices without a vendor are matched as the empty string.
    pub(crate) vendor: Option<ItemFilter<String>>,
    /// Filter based on declared series, or device name where there is none
    pub(crate) family: Option<ItemFilter<String>>,
}

impl Filters {
    /// Take all devices in the catalog
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_filters(
        device_filter: Option<ItemFilter<String>>,
        vendor_filter: Option<ItemFilter<String>>,
        family_filter: Option<ItemFilter<String>>,
    ) -> Self {
        Self {
            device: device_filter,
            vendor: vendor_filter,
            family: family_filter,
        }
    }

    /// Whether `desc` passes every configured filter
    pub fn is_selected(&self, desc: &SourceDescriptor) -> bool {
        let vendor = desc.vendor.as_deref().unwrap_or_default();
        [
            (&self.device, desc.device_name.as_str()),
            (&self.vendor, vendor),
            (&self.family, desc.family_or_name()),
        ]
        .into_iter()
        .all(|(filter, value)| filter.as_ref().map_or(true, |f| f.is_allowed(value)))
    }
}

/// What items of type `T` are allowed or not
pub enum ItemFilter<T: PartialEq> {
    List {
        // If set, only the specified items are allowed. If not set, all items are
        // allowed except the ones listed in blocklist.
        allow_list: Option<Vec<T>>,
        // These items are always blocked even if present in `allow_list`
        block_list: Vec<T>,
    },
    Regex {
        // If set, only items matching the regex are allowed
        allow: Option<Regex>,
        // If set, items matching the regex are not allowed
        block: Option<Regex>,
    },
}

pub(crate) trait IsAllowedOrBlocked<V> {
    fn is_allowed(&self, value: V) -> bool;
}

impl<T, V> IsAllowedOrBlocked<V> for ItemFilter<T>
where
    T: PartialEq + From<V>,
    V: Into<T> + ToString + Clone,
{
    fn is_allowed(&self, value: V) -> bool {
        match self {
            Self::List {
                allow_list,
                block_list,
            } => {
                // Items in block list are always blocked
                if block_list.contains(&value.clone().into()) {
                    return false;
                }
                allow_list
                    .as_ref()
                    .map_or(true, |wl| wl.contains(&value.into()))
            }
            Self::Regex { allow, block } => {
                let value_string = value.to_string();
                let value = value_string.as_ref();
                // Items matched by block regex are always blocked
                if let Some(block) = block {
                    if block.is_match(value) {
                        return false;
                    }
                }
                allow.as_ref().map_or(true, |allow| allow.is_match(value))
            }
        }
    }
}

impl<T: PartialEq> ItemFilter<T> {
    pub fn list(allow_list: Option<Vec<T>>, block_list: Vec<T>) -> ItemFilter<T> {
        Self::List {
            allow_list,
            block_list,
        }
    }

    pub const fn regex(allow: Option<Regex>, block: Option<Regex>) -> ItemFilter<T> {
        Self::Regex { allow, block }
    }
}
