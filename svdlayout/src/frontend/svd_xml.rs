//! CMSIS-SVD front-end
//!
//! Parses one description file into a [`DeviceModel`]. Errors inside a peripheral drop that
//! peripheral only; errors at the device level make the whole file unusable.

use std::{
    collections::{btree_map::Entry, BTreeMap, BTreeSet, HashMap},
    ops::RangeInclusive,
    path,
};

use itertools::Itertools;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use roxmltree::Document;

use crate::{
    error::{ParseError, PeripheralError, PositionalError, SvdParseError},
    model::{
        parse_access, Access, DeviceModel, Interrupt, Partial, Peripheral, PeripheralBuilder,
        Register, RegisterField, RegisterSize,
    },
    util,
};

#[derive(Clone, Copy)]
struct XmlNode<'a, 'input>(roxmltree::Node<'a, 'input>);

impl<'a, 'input> XmlNode<'a, 'input> {
    fn tag(&self) -> &'a str {
        self.0.tag_name().name()
    }

    fn find_text_by_tag_name(
        &self,
        tag: &str,
    ) -> Result<(&'a str, XmlNode<'a, 'input>), PositionalError<SvdParseError>> {
        let (text, node) = self.maybe_find_text_by_tag_name(tag).ok_or_else(|| {
            SvdParseError::ExpectedTagInElement {
                elem_name: self.tag().to_owned(),
                tag: tag.to_owned(),
            }
            .with_byte_pos_range(self.0.range(), self.0.document())
        })?;
        if text.is_empty() {
            return Err(err_with_pos(
                SvdParseError::EmptyElement(tag.to_owned()),
                &node,
            ));
        }
        Ok((text, node))
    }

    fn maybe_find_text_by_tag_name(&self, tag: &str) -> Option<(&'a str, XmlNode<'a, 'input>)> {
        self.maybe_find_child(tag)
            .map(|n| (n.0.text().unwrap_or_default().trim(), n))
    }

    /// Free-form text such as a description, with whitespace collapsed
    fn maybe_text(&self, tag: &str) -> Option<String> {
        self.maybe_find_text_by_tag_name(tag)
            .map(|(text, _)| util::normalize_whitespace(text))
            .filter(|text| !text.is_empty())
    }

    fn maybe_find_child(&self, tag: &str) -> Option<XmlNode<'a, 'input>> {
        self.0.children().find(|n| n.has_tag_name(tag)).map(XmlNode)
    }

    fn children_with_tag_name(&self, tag: &str) -> Vec<XmlNode<'a, 'input>> {
        self.0
            .children()
            .filter(|n| n.has_tag_name(tag))
            .map(XmlNode)
            .collect_vec()
    }

    fn attribute(&self, name: &str) -> Option<&'a str> {
        self.0.attribute(name).map(str::trim)
    }
}

/// Returns the binary multiplier for a CMSIS-SVD scale suffix
fn binary_size_mult_from_char(c: char) -> Result<u64, SvdParseError> {
    match c {
        'k' | 'K' => Ok(1024),
        'm' | 'M' => Ok(1024 * 1024),
        'g' | 'G' => Ok(1024 * 1024 * 1024),
        't' | 'T' => Ok(1024 * 1024 * 1024 * 1024),
        _ => Err(SvdParseError::InvalidSizeMultiplierSuffix(c)),
    }
}

#[test]
fn binary_size_mult_from_char_works() {
    assert_eq!(binary_size_mult_from_char('k').unwrap(), 1024);
    assert_eq!(binary_size_mult_from_char('M').unwrap(), 1024 * 1024);
    assert_eq!(
        binary_size_mult_from_char('t').unwrap(),
        1024 * 1024 * 1024 * 1024
    );
    assert!(binary_size_mult_from_char('x').is_err());
}

/// Parses a CMSIS-SVD `scaledNonNegativeInteger` from `text`
///
/// Accepts hexadecimal (`0x`), binary (`0b` or `#`) and decimal numbers with an optional leading
/// plus sign and an optional binary scale suffix (`k`, `M`, `G`, `T`).
pub(crate) fn parse_nonneg_int(text: &str) -> Result<u64, SvdParseError> {
    // Compile Regexes only once as recommended by the documentation of the Regex crate
    lazy_static! {
        /// Regular expression to capture hexadecimal numbers, as defined in CMSIS-SVD schema
        static ref HEX_NONNEG_INT_RE: Regex = Regex::new(
            r"(?x)              # insignificant whitespace
            ^\+?                # zero or one plus sign
            (?:0x|0X)           # hexadecimal prefix
            ([[:xdigit:]]+)     # one or more hexadecimal digits (captured as #1)
            [[:space:]]?        # zero or one of whitespace
            ([kmgtKMGT])?$      # zero or one of kilo, mega, giga, tera identifier (captured as #2)
        ").unwrap();

        /// Regular expression to capture binary numbers, as defined in CMSIS-SVD schema
        static ref BIN_NONNEG_INT_RE: Regex = Regex::new(
            r"(?x)
            ^\+?
            (?:0b|0B|\#)        # binary prefix
            ([01]+)             # one or more binary digits (captured as #1)
            [[:space:]]?
            ([kmgtKMGT])?$
        ").unwrap();

        /// Regular expression to capture decimal numbers, as defined in CMSIS-SVD schema
        static ref DEC_NONNEG_INT_RE: Regex = Regex::new(
            r"(?x)
            ^\+?
            ([[:digit:]]+)      # one or more decimal digits (captured as #1)
            [[:space:]]?
            ([kmgtKMGT])?$
        ").unwrap();
    }

    let text = text.trim();
    let (captures, radix) = if let Some(c) = HEX_NONNEG_INT_RE.captures(text) {
        (c, 16)
    } else if let Some(c) = BIN_NONNEG_INT_RE.captures(text) {
        (c, 2)
    } else if let Some(c) = DEC_NONNEG_INT_RE.captures(text) {
        (c, 10)
    } else {
        return Err(SvdParseError::InvalidNonnegInt(text.to_owned()));
    };

    let number = u64::from_str_radix(&captures[1], radix)?;
    let size_mult = captures
        .get(2)
        .and_then(|s| s.as_str().chars().next())
        .map(binary_size_mult_from_char)
        .transpose()?;

    match size_mult {
        Some(mult) => number
            .checked_mul(mult)
            .ok_or_else(|| SvdParseError::ValueOverflow(text.to_owned(), u64::BITS)),
        None => Ok(number),
    }
}

fn parse_u32(text: &str) -> Result<u32, SvdParseError> {
    let value = parse_nonneg_int(text)?;
    u32::try_from(value).map_err(|_| SvdParseError::ValueOverflow(text.to_owned(), u32::BITS))
}

#[test]
fn parse_nonneg_int_works() {
    assert_eq!(parse_nonneg_int("0xFFB00000").unwrap(), 0xFFB0_0000);
    assert_eq!(parse_nonneg_int("+0xFFB00000").unwrap(), 0xFFB0_0000);
    assert_eq!(parse_nonneg_int(" 0X70 ").unwrap(), 0x70);
    assert_eq!(parse_nonneg_int("#101").unwrap(), 0b101);
    assert_eq!(parse_nonneg_int("0b11").unwrap(), 0b11);
    assert_eq!(parse_nonneg_int("42").unwrap(), 42);
    assert_eq!(parse_nonneg_int("1 k").unwrap(), 1024);
    assert_eq!(parse_nonneg_int("0x2M").unwrap(), 2 * 1024 * 1024);
    assert_eq!(parse_nonneg_int("437260288").unwrap(), 437_260_288);

    assert!(matches!(
        parse_nonneg_int("0xZZ"),
        Err(SvdParseError::InvalidNonnegInt(_))
    ));
    assert!(parse_nonneg_int("12abc").is_err());
    assert!(parse_nonneg_int("").is_err());
    assert!(parse_nonneg_int("-1").is_err());
    assert!(parse_u32("0x100000000").is_err());
}

/// Enumerated values may contain don't-care bits, e.g., `#1x0`
fn is_dont_care(text: &str) -> bool {
    let text = text.trim();
    let digits = text
        .strip_prefix('#')
        .or_else(|| text.strip_prefix("0b"))
        .or_else(|| text.strip_prefix("0B"));
    digits.is_some_and(|d| d.contains(['x', 'X']))
}

#[test]
fn dont_care_values_are_detected() {
    assert!(is_dont_care("#1x0"));
    assert!(is_dont_care("0b1X"));
    assert!(!is_dont_care("0x10"));
    assert!(!is_dont_care("#10"));
}

/// Add text position information to an [`SvdParseError`] converting it into a [`PositionalError`]
fn err_with_pos(e: impl Into<SvdParseError>, node: &XmlNode) -> PositionalError<SvdParseError> {
    e.into()
        .with_byte_pos_range(node.0.range(), node.0.document())
}

/// Finds a property from `node` by `tag`, calling `process` for its contents if present
///
/// Returns an error if value cannot be parsed in a legal way.
///
/// # Arguments
///
/// * `tag`     - The tag to locate within `node`
/// * `node`    - The node to search (does not recurse)
/// * `process` - The function to call for the found property
fn process_prop_from_node_if_present<T, F>(
    tag: &str,
    node: &XmlNode,
    process: F,
) -> Result<Option<T>, PositionalError<SvdParseError>>
where
    F: Fn(&str) -> Result<T, SvdParseError>,
{
    node.maybe_find_text_by_tag_name(tag)
        .map(|(s, prop_node)| process(s).map_err(|e| err_with_pos(e, &prop_node)))
        .transpose()
}

fn check_node_count(
    node: &XmlNode,
    node_name: &str,
    vector: &[XmlNode],
    expected_count: RangeInclusive<usize>,
) -> Result<(), PositionalError<SvdParseError>> {
    let actual_count = vector.len();
    if expected_count.contains(&actual_count) {
        Ok(())
    } else {
        let node_name = node_name.to_owned();
        let error = SvdParseError::InvalidNodeCount {
            node_name,
            expected_count,
            actual_count,
        };
        Err(err_with_pos(error, node))
    }
}

/// Register properties that cascade from device to peripheral to cluster to register
#[derive(Clone, Debug, Default)]
struct RegPropGroupBuilder {
    /// Register bit-width.
    size: Option<u64>,
    /// Register access rights.
    access: Option<Access>,
    /// Register value after reset.
    reset_value: Option<u64>,
    /// Register bits with defined reset value are marked as high.
    reset_mask: Option<u64>,
}

struct RegisterProperties {
    size: RegisterSize,
    access: Access,
    reset_value: Option<u64>,
    reset_mask: Option<u64>,
}

impl RegPropGroupBuilder {
    /// Returns a new [`RegPropGroupBuilder`] with applicable attributes from `node`
    fn try_from_node(node: &XmlNode) -> Result<Self, PositionalError<SvdParseError>> {
        let mut properties = Self::default();
        properties.update_from_node(node)?;
        Ok(properties)
    }

    /// Inherit properties from parent and update with current node's properties if defined.
    ///
    /// # Arguments
    ///
    /// * `node` - can be either peripheral, cluster or register node
    fn clone_and_update_from_node(
        &self,
        node: &XmlNode,
    ) -> Result<Self, PositionalError<SvdParseError>> {
        let mut properties = self.clone();
        properties.update_from_node(node)?;
        Ok(properties)
    }

    /// Update properties for this [`RegPropGroupBuilder`] where present
    ///
    /// Updates the following attributes from `node`:
    ///
    /// * size
    /// * access
    /// * resetValue
    /// * resetMask
    fn update_from_node(&mut self, node: &XmlNode) -> Result<(), PositionalError<SvdParseError>> {
        if let Some(size) = process_prop_from_node_if_present("size", node, parse_nonneg_int)? {
            self.size = Some(size);
        }
        if let Some(access) = process_prop_from_node_if_present("access", node, parse_access)? {
            self.access = Some(access);
        }
        if let Some(reset_value) =
            process_prop_from_node_if_present("resetValue", node, parse_nonneg_int)?
        {
            self.reset_value = Some(reset_value);
        }
        if let Some(reset_mask) =
            process_prop_from_node_if_present("resetMask", node, parse_nonneg_int)?
        {
            self.reset_mask = Some(reset_mask);
        }
        Ok(())
    }

    fn build(&self, reg_path: &str) -> Result<RegisterProperties, SvdParseError> {
        let size = match self.size {
            Some(bits) => RegisterSize::try_from(bits)?,
            None => {
                warn!("property 'size' is not defined for register '{reg_path}' or any of its parents, assuming size = 32");
                RegisterSize::U32
            }
        };
        let access = self.access.unwrap_or_else(|| {
            warn!("property 'access' is not defined for register '{reg_path}' or any of its parents, assuming access = read-write");
            Access::ReadWrite
        });
        let max = size.max_value();
        let reset_value = self.reset_value.map(|value| {
            if value > max {
                warn!("resetValue {value:#x} of register '{reg_path}' is wider than {size}, truncating");
            }
            value & max
        });
        Ok(RegisterProperties {
            size,
            access,
            reset_value,
            reset_mask: self.reset_mask.map(|mask| mask & max),
        })
    }
}

/// Array or list dimension of a register, cluster or field
#[derive(Clone, Debug)]
struct DimElement {
    dim: u32,
    dim_increment: u64,
    dim_index: Option<DimIndex>,
}

impl DimElement {
    /// Names substituted for `%s`, one per element
    fn indices(&self) -> Vec<String> {
        (0..self.dim as usize)
            .map(|i| {
                self.dim_index
                    .as_ref()
                    .and_then(|index| index.get(i))
                    .unwrap_or_else(|| i.to_string())
            })
            .collect()
    }

    /// Offset of element `i` when the first element is at `base`
    fn offset_of(&self, base: u64, i: usize) -> Option<u64> {
        self.dim_increment
            .checked_mul(i as u64)
            .and_then(|delta| base.checked_add(delta))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum DimIndex {
    NumberRange(RangeInclusive<u64>),
    LetterRange(RangeInclusive<char>),
    List(Vec<String>),
}

impl DimIndex {
    fn parse(text: &str, dim: u32) -> Result<Self, SvdParseError> {
        lazy_static! {
            static ref NUMBERED: Regex =
                Regex::new(r"^(?P<start>[0-9]+)\s*-\s*(?P<end>[0-9]+)$").unwrap();
            static ref LETTERED: Regex = Regex::new(r"^[A-Za-z]\s*-\s*[A-Za-z]$").unwrap();
            static ref LISTED: Regex =
                Regex::new(r"^[_0-9a-zA-Z]+(\s*,\s*[_0-9a-zA-Z]+)*$").unwrap();
        }

        let text = text.trim();
        let index = if let Some(captures) = NUMBERED.captures(text) {
            let start: u64 = captures["start"].parse()?;
            let end: u64 = captures["end"].parse()?;
            Self::NumberRange(start..=end)
        } else if LETTERED.is_match(text) {
            let mut chars = text.chars();
            match (chars.next(), chars.next_back()) {
                (Some(start), Some(end)) => Self::LetterRange(start..=end),
                _ => return Err(SvdParseError::InvalidDimIndex(text.to_owned())),
            }
        } else if LISTED.is_match(text) {
            Self::List(text.split(',').map(|s| s.trim().to_owned()).collect())
        } else {
            return Err(SvdParseError::InvalidDimIndex(text.to_owned()));
        };

        let len = index.len();
        if len != dim as usize {
            return Err(SvdParseError::DimIndexLength {
                index: text.to_owned(),
                len,
                dim,
            });
        }
        Ok(index)
    }

    fn len(&self) -> usize {
        match self {
            Self::NumberRange(range) => range.clone().count(),
            Self::LetterRange(range) => range.clone().count(),
            Self::List(list) => list.len(),
        }
    }

    fn get(&self, index: usize) -> Option<String> {
        match self {
            Self::NumberRange(range) => range.clone().nth(index).map(|n| n.to_string()),
            Self::LetterRange(range) => range.clone().nth(index).map(|c| c.to_string()),
            Self::List(list) => list.get(index).cloned(),
        }
    }
}

#[test]
fn dim_index_forms_parse() {
    let numbers = DimIndex::parse("0-3", 4).unwrap();
    assert_eq!(numbers.get(2).as_deref(), Some("2"));
    let letters = DimIndex::parse("A-D", 4).unwrap();
    assert_eq!(letters.get(3).as_deref(), Some("D"));
    let list = DimIndex::parse("RX, TX", 2).unwrap();
    assert_eq!(list, DimIndex::List(vec!["RX".to_owned(), "TX".to_owned()]));

    assert!(matches!(
        DimIndex::parse("0-3", 2),
        Err(SvdParseError::DimIndexLength { len: 4, dim: 2, .. })
    ));
    assert!(matches!(
        DimIndex::parse("0..3", 4),
        Err(SvdParseError::InvalidDimIndex(_))
    ));
}

fn try_dim_element_from_xml_node(
    node: &XmlNode,
) -> Result<Option<DimElement>, PositionalError<SvdParseError>> {
    let Some((dim, dim_node)) = node.maybe_find_text_by_tag_name("dim") else {
        return Ok(None);
    };
    let dim = parse_u32(dim).map_err(|e| err_with_pos(e, &dim_node))?;
    if dim == 0 {
        return Err(err_with_pos(SvdParseError::ZeroDim, &dim_node));
    }
    let dim_increment = {
        let (dim_inc, dim_inc_node) = node.find_text_by_tag_name("dimIncrement")?;
        parse_nonneg_int(dim_inc).map_err(|e| err_with_pos(e, &dim_inc_node))?
    };
    let dim_index = node
        .maybe_find_text_by_tag_name("dimIndex")
        .map(|(index, index_node)| {
            DimIndex::parse(index, dim).map_err(|e| err_with_pos(e, &index_node))
        })
        .transpose()?;
    Ok(Some(DimElement {
        dim,
        dim_increment,
        dim_index,
    }))
}

/// Replace the `%s` placeholder of an arrayed or listed name
fn substitute_index(name: &str, index: &str) -> String {
    if name.contains("[%s]") {
        name.replace("[%s]", index)
    } else if name.contains("%s") {
        name.replace("%s", index)
    } else {
        format!("{name}{index}")
    }
}

/// Context inherited by registers from their enclosing peripheral and clusters
struct RegisterParent {
    /// Names of the enclosing clusters joined with '_'
    prefix: Option<String>,
    /// Sum of enclosing cluster offsets
    offset: u64,
    properties: RegPropGroupBuilder,
}

impl RegisterParent {
    fn qualify(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{name}"),
            None => name.to_owned(),
        }
    }
}

fn process_field_bit_range(
    node: &XmlNode,
    name: &str,
) -> Result<(u32, u32), PositionalError<SvdParseError>> {
    lazy_static! {
        static ref BIT_RANGE_RE: Regex =
            Regex::new(r"^\[\s*([0-9]+)\s*:\s*([0-9]+)\s*\]$").unwrap();
    }

    if let Some((offset, offset_node)) = node.maybe_find_text_by_tag_name("bitOffset") {
        let offset = parse_u32(offset).map_err(|e| err_with_pos(e, &offset_node))?;
        let (width, width_node) = node.find_text_by_tag_name("bitWidth")?;
        let width = parse_u32(width).map_err(|e| err_with_pos(e, &width_node))?;
        return Ok((offset, width));
    }

    let lsb_msb = |lsb: u32, msb: u32, node: &XmlNode| {
        if msb < lsb {
            Err(err_with_pos(
                SvdParseError::InvalidBitRange(format!("lsb {lsb} is above msb {msb}")),
                node,
            ))
        } else {
            Ok((lsb, msb - lsb + 1))
        }
    };

    if let Some((lsb, lsb_node)) = node.maybe_find_text_by_tag_name("lsb") {
        let lsb = parse_u32(lsb).map_err(|e| err_with_pos(e, &lsb_node))?;
        let (msb, msb_node) = node.find_text_by_tag_name("msb")?;
        let msb = parse_u32(msb).map_err(|e| err_with_pos(e, &msb_node))?;
        return lsb_msb(lsb, msb, node);
    }

    if let Some((range, range_node)) = node.maybe_find_text_by_tag_name("bitRange") {
        let captures = BIT_RANGE_RE.captures(range).ok_or_else(|| {
            err_with_pos(SvdParseError::InvalidBitRange(range.to_owned()), &range_node)
        })?;
        let msb: u32 = captures[1]
            .parse()
            .map_err(|e| err_with_pos(SvdParseError::ParseInt(e), &range_node))?;
        let lsb: u32 = captures[2]
            .parse()
            .map_err(|e| err_with_pos(SvdParseError::ParseInt(e), &range_node))?;
        return lsb_msb(lsb, msb, &range_node);
    }

    Err(err_with_pos(
        SvdParseError::MissingBitRange(name.to_owned()),
        node,
    ))
}

fn process_enumerated_values(
    node: &XmlNode,
    field_path: &str,
) -> Result<Option<BTreeMap<String, u64>>, PositionalError<SvdParseError>> {
    let mut values = BTreeMap::new();
    for group in node.children_with_tag_name("enumeratedValues") {
        if let Some(source) = group.attribute("derivedFrom") {
            warn!("enumerated values of field {field_path} are derived from {source}, which is not supported; the values are omitted");
            continue;
        }
        for value_node in group.children_with_tag_name("enumeratedValue") {
            let (name, _) = value_node.find_text_by_tag_name("name")?;
            let Some((text, text_node)) = value_node.maybe_find_text_by_tag_name("value") else {
                debug!("enumerated value {field_path}.{name} has no value (isDefault), skipping");
                continue;
            };
            if is_dont_care(text) {
                warn!("enumerated value {field_path}.{name} = {text} contains don't-care bits, skipping");
                continue;
            }
            let value = parse_nonneg_int(text).map_err(|e| err_with_pos(e, &text_node))?;
            match values.entry(name.to_owned()) {
                Entry::Vacant(entry) => {
                    entry.insert(value);
                }
                Entry::Occupied(entry) if *entry.get() != value => {
                    warn!(
                        "enumerated value {field_path}.{name} is declared as both {:#x} and {value:#x}, keeping the first",
                        entry.get()
                    );
                }
                Entry::Occupied(_) => {}
            }
        }
    }
    Ok((!values.is_empty()).then_some(values))
}

fn process_field(
    node: &XmlNode,
    reg_path: &str,
) -> Result<Vec<RegisterField>, PositionalError<SvdParseError>> {
    let (name, _) = node.find_text_by_tag_name("name")?;
    let (bit_offset, bit_width) = process_field_bit_range(node, name)?;
    let field_path = format!("{reg_path}.{name}");
    let field = RegisterField {
        name: name.to_owned(),
        description: node.maybe_text("description"),
        bit_offset,
        bit_width,
        access: process_prop_from_node_if_present("access", node, parse_access)?,
        enum_values: process_enumerated_values(node, &field_path)?,
    };

    let Some(dim) = try_dim_element_from_xml_node(node)? else {
        return Ok(vec![field]);
    };
    dim.indices()
        .iter()
        .enumerate()
        .map(|(i, index)| -> Result<_, PositionalError<SvdParseError>> {
            let bit_offset = dim
                .offset_of(u64::from(bit_offset), i)
                .and_then(|o| u32::try_from(o).ok())
                .ok_or_else(|| {
                    err_with_pos(
                        SvdParseError::OffsetOverflow {
                            name: field_path.clone(),
                        },
                        node,
                    )
                })?;
            Ok(RegisterField {
                name: substitute_index(name, index),
                bit_offset,
                ..field.clone()
            })
        })
        .collect()
}

fn process_fields(
    register_node: &XmlNode,
    reg_path: &str,
) -> Result<Vec<RegisterField>, PositionalError<SvdParseError>> {
    let Some(fields_node) = register_node.maybe_find_child("fields") else {
        return Ok(vec![]);
    };
    let mut fields = vec![];
    for field_node in fields_node.children_with_tag_name("field") {
        fields.extend(process_field(&field_node, reg_path)?);
    }
    Ok(fields)
}

fn process_register(
    parent: &RegisterParent,
    register_node: &XmlNode,
) -> Result<Vec<Register>, PositionalError<SvdParseError>> {
    let (name, _) = register_node.find_text_by_tag_name("name")?;
    let reg_path = parent.qualify(name);
    let address_offset = {
        let (addr_offset_str, addr_offset_node) =
            register_node.find_text_by_tag_name("addressOffset")?;
        parse_nonneg_int(addr_offset_str).map_err(|e| err_with_pos(e, &addr_offset_node))?
    };
    let properties = parent
        .properties
        .clone_and_update_from_node(register_node)?
        .build(&reg_path)
        .map_err(|e| err_with_pos(e, register_node))?;
    if let Some(source) = register_node.attribute("derivedFrom") {
        warn!("register {reg_path} is derived from {source}, which is not supported; only its own declaration is used");
    }
    let description = register_node.maybe_text("description");
    let fields = process_fields(register_node, &reg_path)?;

    let make_register =
        |name: String, offset: Option<u64>| -> Result<Register, PositionalError<SvdParseError>> {
            let offset = offset
                .and_then(|o| parent.offset.checked_add(o))
                .and_then(|o| u32::try_from(o).ok())
                .ok_or_else(|| {
                    err_with_pos(
                        SvdParseError::OffsetOverflow { name: name.clone() },
                        register_node,
                    )
                })?;
            let mut register = Register::new(name, offset, properties.size, properties.access)
                .with_fields(fields.clone());
            register.description = description.clone();
            register.reset_value = properties.reset_value;
            register.reset_mask = properties.reset_mask;
            Ok(register)
        };

    match try_dim_element_from_xml_node(register_node)? {
        // Found a single register.
        None => Ok(vec![make_register(reg_path, Some(address_offset))?]),
        // Found an inline array of registers, which is kept as one register
        Some(dim)
            if name.contains("[%s]")
                && dim.dim_increment == u64::from(properties.size.bytes()) =>
        {
            let register = make_register(
                parent.qualify(&name.replace("[%s]", "")),
                Some(address_offset),
            )?
            .with_array_length(dim.dim)
            .map_err(|e| err_with_pos(e, register_node))?;
            Ok(vec![register])
        }
        // Found a list of registers, or an array with gaps between elements
        Some(dim) => {
            if name.contains("[%s]") {
                warn!(
                    "register array {reg_path} has a stride of {} bytes but {} byte elements, expanding into {} registers",
                    dim.dim_increment,
                    properties.size.bytes(),
                    dim.dim
                );
            }
            dim.indices()
                .iter()
                .enumerate()
                .map(|(i, index)| {
                    make_register(
                        parent.qualify(&substitute_index(name, index)),
                        dim.offset_of(address_offset, i),
                    )
                })
                .collect()
        }
    }
}

fn process_cluster(
    parent: &RegisterParent,
    cluster_node: &XmlNode,
) -> Result<Vec<Register>, PositionalError<SvdParseError>> {
    let (name, _) = cluster_node.find_text_by_tag_name("name")?;
    let cluster_offset = {
        let (offset_str, offset_node) = cluster_node.find_text_by_tag_name("addressOffset")?;
        parse_nonneg_int(offset_str).map_err(|e| err_with_pos(e, &offset_node))?
    };
    if let Some(source) = cluster_node.attribute("derivedFrom") {
        warn!(
            "cluster {} is derived from {source}, which is not supported; only its own declaration is used",
            parent.qualify(name)
        );
    }
    let properties = parent.properties.clone_and_update_from_node(cluster_node)?;

    let instances = match try_dim_element_from_xml_node(cluster_node)? {
        None => vec![(name.to_owned(), Some(cluster_offset))],
        Some(dim) => dim
            .indices()
            .iter()
            .enumerate()
            .map(|(i, index)| (substitute_index(name, index), dim.offset_of(cluster_offset, i)))
            .collect_vec(),
    };

    let mut registers = vec![];
    for (instance_name, instance_offset) in instances {
        let offset = instance_offset
            .and_then(|o| parent.offset.checked_add(o))
            .ok_or_else(|| {
                err_with_pos(
                    SvdParseError::OffsetOverflow {
                        name: parent.qualify(&instance_name),
                    },
                    cluster_node,
                )
            })?;
        let current_parent = RegisterParent {
            prefix: Some(parent.qualify(&instance_name)),
            offset,
            properties: properties.clone(),
        };
        registers.extend(process_registers(&current_parent, cluster_node)?);
    }
    Ok(registers)
}

/// Collect the registers and clusters directly below `node` in document order
fn process_registers(
    parent: &RegisterParent,
    node: &XmlNode,
) -> Result<Vec<Register>, PositionalError<SvdParseError>> {
    let mut registers = vec![];
    for child in node.0.children().filter(|n| n.is_element()).map(XmlNode) {
        match child.tag() {
            "register" => registers.extend(process_register(parent, &child)?),
            "cluster" => registers.extend(process_cluster(parent, &child)?),
            _ => {}
        }
    }
    Ok(registers)
}

fn process_interrupts(
    periph_node: &XmlNode,
) -> Result<Vec<Interrupt>, PositionalError<SvdParseError>> {
    periph_node
        .children_with_tag_name("interrupt")
        .iter()
        .map(|node| -> Result<_, PositionalError<SvdParseError>> {
            let (name, _) = node.find_text_by_tag_name("name")?;
            let (value, value_node) = node.find_text_by_tag_name("value")?;
            Ok(Interrupt {
                value: parse_u32(value).map_err(|e| err_with_pos(e, &value_node))?,
                name: name.to_owned(),
                description: node.maybe_text("description"),
            })
        })
        .collect()
}

/// Footprint of a peripheral as declared by its `<addressBlock>` elements
fn process_address_blocks(
    periph_node: &XmlNode,
) -> Result<Option<u64>, PositionalError<SvdParseError>> {
    let mut footprint = None;
    for block in periph_node.children_with_tag_name("addressBlock") {
        let (offset, offset_node) = block.find_text_by_tag_name("offset")?;
        let offset = parse_nonneg_int(offset).map_err(|e| err_with_pos(e, &offset_node))?;
        let (size, size_node) = block.find_text_by_tag_name("size")?;
        let size = parse_nonneg_int(size).map_err(|e| err_with_pos(e, &size_node))?;
        let end = offset.checked_add(size).ok_or_else(|| {
            err_with_pos(
                SvdParseError::OffsetOverflow {
                    name: "addressBlock".to_owned(),
                },
                &block,
            )
        })?;
        footprint = footprint.max(Some(end));
    }
    Ok(footprint)
}

/// A successfully materialized peripheral and the properties its registers inherit
#[derive(Clone)]
struct Resolved {
    peripheral: Peripheral,
    properties: RegPropGroupBuilder,
}

/// Materializes peripherals, resolving `derivedFrom` chains on demand
struct Resolver<'d, 'a, 'input> {
    fname: &'d str,
    device_properties: &'d RegPropGroupBuilder,
    decls: &'d BTreeMap<String, XmlNode<'a, 'input>>,
    /// `None` marks a peripheral that was skipped and already reported
    done: HashMap<String, Option<Resolved>>,
    skipped: Vec<PeripheralError>,
    interrupts: BTreeSet<Interrupt>,
}

impl<'d, 'a, 'input> Resolver<'d, 'a, 'input> {
    /// Returns whether the peripheral `name` was materialized
    fn resolve(&mut self, name: &str, visiting: &mut Vec<String>) -> bool {
        if let Some(done) = self.done.get(name) {
            return done.is_some();
        }
        let Some(node) = self.decls.get(name).copied() else {
            return false;
        };

        visiting.push(name.to_owned());
        let result = self.process_peripheral(name, &node, visiting);
        visiting.pop();

        match result {
            Ok(resolved) => {
                self.done.insert(name.to_owned(), Some(resolved));
                true
            }
            Err(err) => {
                let err = PeripheralError {
                    peripheral: name.to_owned(),
                    err: err.with_fname(self.fname.to_owned()),
                };
                warn!("{err}");
                self.skipped.push(err);
                self.done.insert(name.to_owned(), None);
                false
            }
        }
    }

    fn template(
        &mut self,
        name: &str,
        source: &str,
        node: &XmlNode,
        visiting: &mut Vec<String>,
    ) -> Result<Resolved, PositionalError<SvdParseError>> {
        if visiting.iter().any(|v| v == source) {
            return Err(err_with_pos(
                SvdParseError::DerivationCycle(name.to_owned()),
                node,
            ));
        }
        if !self.decls.contains_key(source) {
            return Err(err_with_pos(
                SvdParseError::UnknownDerivationSource {
                    periph: name.to_owned(),
                    source_name: source.to_owned(),
                },
                node,
            ));
        }
        if !self.resolve(source, visiting) {
            return Err(err_with_pos(
                SvdParseError::DerivationSourceFailed {
                    periph: name.to_owned(),
                    source_name: source.to_owned(),
                },
                node,
            ));
        }
        self.done
            .get(source)
            .cloned()
            .flatten()
            .ok_or_else(|| {
                err_with_pos(
                    SvdParseError::DerivationSourceFailed {
                        periph: name.to_owned(),
                        source_name: source.to_owned(),
                    },
                    node,
                )
            })
    }

    fn process_peripheral(
        &mut self,
        name: &str,
        node: &XmlNode,
        visiting: &mut Vec<String>,
    ) -> Result<Resolved, PositionalError<SvdParseError>> {
        let template = match node.attribute("derivedFrom") {
            Some(source) => Some(self.template(name, source, node, visiting)?),
            None => None,
        };

        let properties = template
            .as_ref()
            .map_or(self.device_properties, |t| &t.properties)
            .clone_and_update_from_node(node)?;
        let base_address = {
            let (base_addr_str, base_addr_node) = node.find_text_by_tag_name("baseAddress")?;
            parse_nonneg_int(base_addr_str).map_err(|e| err_with_pos(e, &base_addr_node))?
        };
        let registers = match node.maybe_find_child("registers") {
            Some(registers_node) => {
                let parent = RegisterParent {
                    prefix: None,
                    offset: 0,
                    properties: properties.clone(),
                };
                process_registers(&parent, &registers_node)?
            }
            None => vec![],
        };
        let interrupts = process_interrupts(node)?;

        let builder = match &template {
            Some(template) => {
                debug!(
                    "peripheral {name} is derived from {}, {} registers redeclared locally",
                    template.peripheral.name,
                    registers.len()
                );
                template.peripheral.derive(name).base_address(base_address)
            }
            None => {
                if registers.is_empty() {
                    warn!("peripheral {name} declares no registers");
                }
                PeripheralBuilder::new(name, base_address)
            }
        };
        let peripheral = builder
            .description(node.maybe_text("description"))
            .group_name(node.maybe_text("groupName"))
            .size_bytes(process_address_blocks(node)?)
            .override_registers(registers)
            .build();

        self.interrupts.extend(interrupts);
        Ok(Resolved {
            peripheral,
            properties,
        })
    }
}

fn process_device(
    device_node: &XmlNode,
    fname: &str,
) -> Result<Partial<DeviceModel, PeripheralError>, PositionalError<SvdParseError>> {
    let (name, _) = device_node.find_text_by_tag_name("name")?;
    let device_properties = RegPropGroupBuilder::try_from_node(device_node)?;

    let peripherals_nodes = device_node.children_with_tag_name("peripherals");
    check_node_count(device_node, "peripherals", &peripherals_nodes, 0..=1)?;
    let peripheral_nodes = peripherals_nodes
        .first()
        .map(|n| n.children_with_tag_name("peripheral"))
        .unwrap_or_default();
    if peripheral_nodes.is_empty() {
        warn!("device {name} declares no peripherals");
    }

    let mut skipped = vec![];
    let mut decls = BTreeMap::new();
    let mut order = vec![];
    for (i, periph_node) in peripheral_nodes.into_iter().enumerate() {
        match periph_node.find_text_by_tag_name("name") {
            Ok((periph_name, _)) if decls.contains_key(periph_name) => {
                let err = PeripheralError {
                    peripheral: periph_name.to_owned(),
                    err: err_with_pos(
                        SvdParseError::DuplicatePeripheral(periph_name.to_owned()),
                        &periph_node,
                    )
                    .with_fname(fname.to_owned()),
                };
                warn!("{err}");
                skipped.push(err);
            }
            Ok((periph_name, _)) => {
                decls.insert(periph_name.to_owned(), periph_node);
                order.push(periph_name.to_owned());
            }
            Err(e) => {
                let err = PeripheralError {
                    peripheral: format!("#{i}"),
                    err: e.with_fname(fname.to_owned()),
                };
                warn!("{err}");
                skipped.push(err);
            }
        }
    }

    let mut resolver = Resolver {
        fname,
        device_properties: &device_properties,
        decls: &decls,
        done: HashMap::new(),
        skipped: vec![],
        interrupts: BTreeSet::new(),
    };
    for periph_name in &order {
        resolver.resolve(periph_name, &mut vec![]);
    }
    skipped.extend(resolver.skipped);

    let peripherals: BTreeMap<String, Peripheral> = resolver
        .done
        .into_iter()
        .filter_map(|(name, resolved)| resolved.map(|r| (name, r.peripheral)))
        .collect();

    let device = DeviceModel {
        name: name.to_owned(),
        vendor: device_node.maybe_text("vendor"),
        family: device_node
            .maybe_text("series")
            .unwrap_or_else(|| name.to_owned()),
        version: device_node.maybe_text("version"),
        description: device_node.maybe_text("description"),
        peripherals,
        interrupts: resolver.interrupts,
    };
    info!(
        "Parsed device {}: {} peripherals, {} registers, {} skipped peripherals",
        device.name,
        device.peripherals.len(),
        device.register_count(),
        skipped.len()
    );
    Ok(Partial::new(device, skipped))
}

/// Parse SVD XML `content` into a device model
///
/// # Arguments
///
/// * `content` - The SVD document
/// * `fname`   - Name of the source, used in error messages
pub(crate) fn parse_svd_str(
    content: &str,
    fname: &str,
) -> Result<Partial<DeviceModel, PeripheralError>, ParseError> {
    let parsed = Document::parse(content).map_err(|source| ParseError::MalformedXml {
        fname: fname.to_owned(),
        source,
    })?;
    let root = XmlNode(parsed.root_element());
    let result = if root.0.has_tag_name("device") {
        process_device(&root, fname)
    } else {
        Err(err_with_pos(
            SvdParseError::ExpectedTagInElement {
                elem_name: root.tag().to_owned(),
                tag: "device".to_owned(),
            },
            &root,
        ))
    };
    result.map_err(|positional| positional.with_fname(fname.to_owned()).into())
}

/// Parse the file at `svd_path` into a device model
pub(crate) fn parse_svd_file(
    svd_path: &path::Path,
) -> Result<Partial<DeviceModel, PeripheralError>, ParseError> {
    let content = util::read_file(svd_path)?;
    parse_svd_str(&content, &svd_path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use indoc::indoc;

    fn parse(content: &str) -> Partial<DeviceModel, PeripheralError> {
        parse_svd_str(content, "test.svd").unwrap()
    }

    const SAM: &str = indoc! {r#"
        <?xml version="1.0" encoding="utf-8"?>
        <device schemaVersion="1.1" xmlns:xs="http://www.w3.org/2001/XMLSchema-instance">
          <vendor>Atmel</vendor>
          <name>ATSAM3X8E</name>
          <series>SAM3XA</series>
          <version>1.0</version>
          <size>32</size>
          <access>read-write</access>
          <resetValue>0x00000000</resetValue>
          <resetMask>0xFFFFFFFF</resetMask>
          <peripherals>
            <peripheral>
              <name>PIOA</name>
              <description>Parallel Input/Output
                Controller A</description>
              <baseAddress>0x400E0E00</baseAddress>
              <addressBlock>
                <offset>0x0</offset>
                <size>0x200</size>
                <usage>registers</usage>
              </addressBlock>
              <interrupt>
                <name>PIOA</name>
                <value>11</value>
              </interrupt>
              <registers>
                <register>
                  <name>PER</name>
                  <addressOffset>0x0</addressOffset>
                  <access>write-only</access>
                </register>
                <register>
                  <dim>2</dim>
                  <dimIncrement>4</dimIncrement>
                  <name>ABCDSR[%s]</name>
                  <addressOffset>0x70</addressOffset>
                  <fields>
                    <field>
                      <name>P0</name>
                      <bitOffset>0</bitOffset>
                      <bitWidth>1</bitWidth>
                    </field>
                    <field>
                      <name>MODE</name>
                      <bitRange>[6:4]</bitRange>
                      <access>read-only</access>
                      <enumeratedValues>
                        <enumeratedValue><name>C</name><value>5</value></enumeratedValue>
                        <enumeratedValue><name>A</name><value>0</value></enumeratedValue>
                        <enumeratedValue><name>B</name><value>#1</value></enumeratedValue>
                        <enumeratedValue><name>ANY</name><isDefault>true</isDefault></enumeratedValue>
                      </enumeratedValues>
                    </field>
                    <field>
                      <name>HI</name>
                      <lsb>8</lsb>
                      <msb>15</msb>
                    </field>
                  </fields>
                </register>
                <register>
                  <name>IFSCER</name>
                  <addressOffset>0x78</addressOffset>
                  <size>16</size>
                  <resetValue>0x1234</resetValue>
                </register>
              </registers>
            </peripheral>
          </peripherals>
        </device>
    "#};

    #[test]
    fn parses_device_metadata() {
        let parsed = parse(SAM);
        assert!(parsed.is_complete());
        let device = parsed.value;
        assert_eq!(device.name, "ATSAM3X8E");
        assert_eq!(device.vendor.as_deref(), Some("Atmel"));
        assert_eq!(device.family, "SAM3XA");
        assert_eq!(device.version.as_deref(), Some("1.0"));
        assert_eq!(device.interrupts.len(), 1);
        assert_eq!(device.interrupts.first().map(|i| i.value), Some(11));

        let pioa = &device.peripherals["PIOA"];
        assert_eq!(pioa.base_address, 0x400E_0E00);
        assert_eq!(pioa.size_bytes, Some(0x200));
        assert_eq!(
            pioa.description.as_deref(),
            Some("Parallel Input/Output Controller A")
        );
        assert_eq!(pioa.kind, crate::model::PeripheralKind::Gpio);
    }

    #[test]
    fn shared_interrupt_is_listed_once() {
        let parsed = parse(indoc! {r#"
            <device>
              <name>DEV</name>
              <size>32</size>
              <access>read-write</access>
              <peripherals>
                <peripheral>
                  <name>UART0</name>
                  <baseAddress>0x40000000</baseAddress>
                  <interrupt><name>UART</name><description>UART0 events</description><value>5</value></interrupt>
                  <interrupt><name>DMA</name><value>2</value></interrupt>
                </peripheral>
                <peripheral>
                  <name>UART1</name>
                  <baseAddress>0x40001000</baseAddress>
                  <interrupt><name>UART</name><description>UART1 events</description><value>5</value></interrupt>
                </peripheral>
              </peripherals>
            </device>
        "#});
        assert!(parsed.is_complete());
        let interrupts = parsed
            .value
            .interrupts
            .iter()
            .map(|i| (i.value, i.name.as_str()))
            .collect_vec();
        assert_eq!(interrupts, vec![(2, "DMA"), (5, "UART")]);
    }

    #[test]
    fn keeps_inline_arrays_as_one_register() {
        let device = parse(SAM).value;
        let pioa = &device.peripherals["PIOA"];
        let names = pioa.registers.iter().map(|r| r.name.as_str()).collect_vec();
        assert_eq!(names, ["PER", "ABCDSR", "IFSCER"]);

        let abcdsr = pioa.register("ABCDSR").unwrap();
        assert_eq!(abcdsr.offset, 0x70);
        assert_eq!(abcdsr.array_length(), 2);
        assert_eq!(abcdsr.size, RegisterSize::U32);
        assert_eq!(abcdsr.footprint(), 8);
    }

    #[test]
    fn cascades_register_properties() {
        let device = parse(SAM).value;
        let pioa = &device.peripherals["PIOA"];

        let per = pioa.register("PER").unwrap();
        assert_eq!(per.access, Access::WriteOnly);
        assert_eq!(per.size, RegisterSize::U32);
        assert_eq!(per.reset_value, Some(0));

        let ifscer = pioa.register("IFSCER").unwrap();
        assert_eq!(ifscer.size, RegisterSize::U16);
        assert_eq!(ifscer.access, Access::ReadWrite);
        assert_eq!(ifscer.reset_value, Some(0x1234));
        // Device level mask is truncated to the register width
        assert_eq!(ifscer.reset_mask, Some(0xFFFF));
    }

    #[test]
    fn parses_fields_in_every_bit_range_form() {
        let device = parse(SAM).value;
        let abcdsr = device.peripherals["PIOA"].register("ABCDSR").unwrap();
        let fields = abcdsr
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.bit_offset, f.bit_width))
            .collect_vec();
        assert_eq!(fields, [("P0", 0, 1), ("MODE", 4, 3), ("HI", 8, 8)]);

        let mode = &abcdsr.fields[1];
        assert_eq!(mode.access, Some(Access::ReadOnly));
        let values = mode.enum_values.as_ref().unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values["B"], 1);
        assert_eq!(values["C"], 5);
    }

    const DERIVED: &str = indoc! {r#"
        <device>
          <name>DEV</name>
          <size>32</size>
          <access>read-write</access>
          <peripherals>
            <peripheral>
              <name>USART0</name>
              <description>USART</description>
              <baseAddress>0x40098000</baseAddress>
              <registers>
                <register><name>CR</name><addressOffset>0x0</addressOffset></register>
                <register><name>MR</name><addressOffset>0x4</addressOffset></register>
                <register><name>IER</name><addressOffset>0x8</addressOffset></register>
              </registers>
            </peripheral>
            <peripheral derivedFrom="USART0">
              <name>USART1</name>
              <baseAddress>0x4009C000</baseAddress>
              <registers>
                <register>
                  <name>MR</name>
                  <addressOffset>0x4</addressOffset>
                  <size>16</size>
                  <fields>
                    <field><name>MODE</name><bitOffset>0</bitOffset><bitWidth>4</bitWidth></field>
                  </fields>
                </register>
              </registers>
            </peripheral>
            <peripheral derivedFrom="USART1">
              <name>USART2</name>
              <baseAddress>0x400A0000</baseAddress>
            </peripheral>
          </peripherals>
        </device>
    "#};

    #[test]
    fn derivation_copies_then_overrides() {
        let device = parse(DERIVED).value;
        let usart0 = &device.peripherals["USART0"];
        let usart1 = &device.peripherals["USART1"];

        assert_eq!(usart1.base_address, 0x4009_C000);
        assert_eq!(usart1.derived_from.as_deref(), Some("USART0"));
        assert_eq!(usart1.description.as_deref(), Some("USART"));
        assert_eq!(usart1.registers.len(), 3);

        // Local redeclaration replaces the copied register, not merges with it
        let mr = usart1.register("MR").unwrap();
        assert_eq!(mr.size, RegisterSize::U16);
        assert_eq!(mr.fields.len(), 1);
        assert_eq!(usart0.register("MR").unwrap().size, RegisterSize::U32);
        assert!(usart0.register("MR").unwrap().fields.is_empty());
    }

    #[test]
    fn derivation_chains_resolve() {
        let device = parse(DERIVED).value;
        let usart2 = &device.peripherals["USART2"];
        assert_eq!(usart2.base_address, 0x400A_0000);
        assert_eq!(usart2.derived_from.as_deref(), Some("USART1"));
        assert_eq!(
            usart2.register("MR").unwrap().size,
            RegisterSize::U16,
            "USART2 must see USART1's override"
        );
    }

    #[test]
    fn derivation_failures_are_per_peripheral() {
        let parsed = parse(indoc! {r#"
            <device>
              <name>DEV</name>
              <peripherals>
                <peripheral derivedFrom="B"><name>A</name><baseAddress>0</baseAddress></peripheral>
                <peripheral derivedFrom="A"><name>B</name><baseAddress>0</baseAddress></peripheral>
                <peripheral derivedFrom="NOPE"><name>C</name><baseAddress>0</baseAddress></peripheral>
                <peripheral><name>D</name><baseAddress>0x10</baseAddress></peripheral>
              </peripherals>
            </device>
        "#});
        assert_eq!(parsed.value.peripherals.keys().collect_vec(), ["D"]);
        let skipped = parsed
            .skipped
            .iter()
            .map(|e| e.peripheral.as_str())
            .sorted()
            .collect_vec();
        assert_eq!(skipped, ["A", "B", "C"]);
        assert!(parsed.skipped.iter().any(|e| matches!(
            e.inner(),
            SvdParseError::UnknownDerivationSource { .. }
        )));
        assert!(parsed
            .skipped
            .iter()
            .any(|e| matches!(e.inner(), SvdParseError::DerivationCycle(_))));
    }

    #[test]
    fn malformed_number_skips_only_its_peripheral() {
        let parsed = parse(indoc! {r#"
            <device>
              <name>DEV</name>
              <size>32</size>
              <access>read-write</access>
              <peripherals>
                <peripheral>
                  <name>GOOD</name>
                  <baseAddress>0x1000</baseAddress>
                  <registers>
                    <register><name>R</name><addressOffset>0x0</addressOffset></register>
                  </registers>
                </peripheral>
                <peripheral>
                  <name>BAD</name>
                  <baseAddress>0x2000</baseAddress>
                  <registers>
                    <register><name>R</name><addressOffset>0xZZ</addressOffset></register>
                  </registers>
                </peripheral>
              </peripherals>
            </device>
        "#});
        assert!(parsed.value.peripherals.contains_key("GOOD"));
        assert!(!parsed.value.peripherals.contains_key("BAD"));
        assert_eq!(parsed.skipped.len(), 1);
        let err = &parsed.skipped[0];
        assert_eq!(err.peripheral, "BAD");
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert!(matches!(err.inner(), SvdParseError::InvalidNonnegInt(s) if s == "0xZZ"));
        assert!(err.to_string().contains("test.svd"));
    }

    #[test]
    fn invalid_register_size_skips_its_peripheral() {
        let parsed = parse(indoc! {r#"
            <device>
              <name>DEV</name>
              <peripherals>
                <peripheral>
                  <name>WIDE</name>
                  <baseAddress>0x1000</baseAddress>
                  <registers>
                    <register><name>R</name><addressOffset>0</addressOffset><size>64</size></register>
                  </registers>
                </peripheral>
              </peripherals>
            </device>
        "#});
        assert!(parsed.value.peripherals.is_empty());
        assert!(matches!(
            parsed.skipped[0].inner(),
            SvdParseError::InvalidRegisterSize(64)
        ));
    }

    #[test]
    fn missing_device_name_is_fatal() {
        let err = parse_svd_str("<device><peripherals/></device>", "x.svd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);

        let err = parse_svd_str("<notadevice/>", "x.svd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
    }

    #[test]
    fn unparsable_xml_is_malformed_input() {
        let err = parse_svd_str("<device><name>X</name>", "x.svd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert!(matches!(err, ParseError::MalformedXml { .. }));
    }

    #[test]
    fn lists_and_strided_arrays_are_expanded() {
        let device = parse(indoc! {r#"
            <device>
              <name>DEV</name>
              <size>32</size>
              <access>read-write</access>
              <peripherals>
                <peripheral>
                  <name>DMAC</name>
                  <baseAddress>0x400C4000</baseAddress>
                  <registers>
                    <register>
                      <dim>2</dim>
                      <dimIncrement>0x10</dimIncrement>
                      <dimIndex>RX,TX</dimIndex>
                      <name>%s_CTRL</name>
                      <addressOffset>0x20</addressOffset>
                    </register>
                    <register>
                      <dim>3</dim>
                      <dimIncrement>8</dimIncrement>
                      <name>SADDR[%s]</name>
                      <addressOffset>0x40</addressOffset>
                    </register>
                  </registers>
                </peripheral>
              </peripherals>
            </device>
        "#})
        .value;
        let dmac = &device.peripherals["DMAC"];
        let regs = dmac
            .registers
            .iter()
            .map(|r| (r.name.as_str(), r.offset, r.array_length()))
            .collect_vec();
        assert_eq!(
            regs,
            [
                ("RX_CTRL", 0x20, 1),
                ("TX_CTRL", 0x30, 1),
                ("SADDR0", 0x40, 1),
                ("SADDR1", 0x48, 1),
                ("SADDR2", 0x50, 1),
            ]
        );
    }

    #[test]
    fn clusters_are_flattened() {
        let device = parse(indoc! {r#"
            <device>
              <name>DEV</name>
              <size>32</size>
              <access>read-write</access>
              <peripherals>
                <peripheral>
                  <name>CAN0</name>
                  <baseAddress>0x40000000</baseAddress>
                  <registers>
                    <register><name>MR</name><addressOffset>0x0</addressOffset></register>
                    <cluster>
                      <dim>2</dim>
                      <dimIncrement>0x20</dimIncrement>
                      <name>MB[%s]</name>
                      <addressOffset>0x200</addressOffset>
                      <register><name>MMR</name><addressOffset>0x0</addressOffset></register>
                      <register><name>MAM</name><addressOffset>0x4</addressOffset><size>16</size></register>
                    </cluster>
                  </registers>
                </peripheral>
              </peripherals>
            </device>
        "#})
        .value;
        let can = &device.peripherals["CAN0"];
        let regs = can
            .registers
            .iter()
            .map(|r| (r.name.as_str(), r.offset, r.size.bits()))
            .collect_vec();
        assert_eq!(
            regs,
            [
                ("MR", 0x0, 32),
                ("MB0_MMR", 0x200, 32),
                ("MB0_MAM", 0x204, 16),
                ("MB1_MMR", 0x220, 32),
                ("MB1_MAM", 0x224, 16),
            ]
        );
    }
}
