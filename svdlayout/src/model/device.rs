//! Device and peripheral level model types

use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::Regex;

use super::Register;

/// Root of the parser output, exclusively owned by whoever requested the parse
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceModel {
    pub name: String,
    pub vendor: Option<String>,
    /// `<series>` when declared, device name otherwise
    pub family: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub peripherals: BTreeMap<String, Peripheral>,
    pub interrupts: BTreeSet<Interrupt>,
}

impl DeviceModel {
    /// Total number of registers over all peripherals, counting an array as one register
    pub fn register_count(&self) -> usize {
        self.peripherals.values().map(|p| p.registers.len()).sum()
    }
}

/// Interrupt vector, identified and ordered by `(value, name)`
///
/// The description does not take part in comparisons, so a vector shared by several peripherals
/// is kept once.
#[derive(Clone, Debug)]
pub struct Interrupt {
    pub value: u32,
    pub name: String,
    pub description: Option<String>,
}

impl Interrupt {
    fn key(&self) -> (u32, &str) {
        (self.value, &self.name)
    }
}

impl PartialEq for Interrupt {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Interrupt {}

impl PartialOrd for Interrupt {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Interrupt {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// A hardware block exposed as a contiguous block of registers at a known base address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peripheral {
    pub name: String,
    pub base_address: u64,
    pub description: Option<String>,
    pub group_name: Option<String>,
    /// Name of the template this peripheral was derived from
    pub derived_from: Option<String>,
    pub kind: PeripheralKind,
    /// Footprint declared by the `<addressBlock>` elements, in bytes
    pub size_bytes: Option<u64>,
    pub registers: Vec<Register>,
}

impl Peripheral {
    pub fn new(name: impl Into<String>, base_address: u64) -> Self {
        let name = name.into();
        let kind = PeripheralKind::classify(None, &name);
        Self {
            name,
            base_address,
            description: None,
            group_name: None,
            derived_from: None,
            kind,
            size_bytes: None,
            registers: vec![],
        }
    }

    /// Start a new peripheral using `self` as the template
    ///
    /// The returned builder owns a deep copy of this peripheral; nothing in the built value refers
    /// back to the template.
    #[must_use]
    pub fn derive(&self, name: impl Into<String>) -> PeripheralBuilder {
        let mut inner = self.clone();
        inner.name = name.into();
        inner.derived_from = Some(self.name.clone());
        PeripheralBuilder { inner }
    }

    pub fn register(&self, name: &str) -> Option<&Register> {
        self.registers.iter().find(|r| r.name == name)
    }
}

/// Clone-with-overrides builder for derived peripherals, see [`Peripheral::derive`]
#[derive(Clone, Debug)]
pub struct PeripheralBuilder {
    inner: Peripheral,
}

impl PeripheralBuilder {
    /// Start a peripheral without a template
    pub fn new(name: impl Into<String>, base_address: u64) -> Self {
        Self {
            inner: Peripheral::new(name, base_address),
        }
    }

    #[must_use]
    pub fn base_address(mut self, base_address: u64) -> Self {
        self.inner.base_address = base_address;
        self
    }

    #[must_use]
    pub fn description(mut self, description: Option<String>) -> Self {
        if description.is_some() {
            self.inner.description = description;
        }
        self
    }

    #[must_use]
    pub fn group_name(mut self, group_name: Option<String>) -> Self {
        if group_name.is_some() {
            self.inner.group_name = group_name;
        }
        self
    }

    #[must_use]
    pub fn size_bytes(mut self, size_bytes: Option<u64>) -> Self {
        if size_bytes.is_some() {
            self.inner.size_bytes = size_bytes;
        }
        self
    }

    /// Apply locally declared registers
    ///
    /// A local register replaces the copied register of the same name entirely. Registers with new
    /// names are appended.
    #[must_use]
    pub fn override_registers(mut self, local: Vec<Register>) -> Self {
        for reg in local {
            match self.inner.registers.iter_mut().find(|r| r.name == reg.name) {
                Some(copied) => *copied = reg,
                None => self.inner.registers.push(reg),
            }
        }
        self
    }

    pub fn build(mut self) -> Peripheral {
        self.inner.kind =
            PeripheralKind::classify(self.inner.group_name.as_deref(), &self.inner.name);
        self.inner
    }
}

/// Semantic family of a peripheral
///
/// Resolved once while parsing so that consumers can match on it instead of inspecting names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum PeripheralKind {
    Gpio,
    Uart,
    Spi,
    I2c,
    Timer,
    Pwm,
    Adc,
    Dac,
    Dma,
    Usb,
    Can,
    Ethernet,
    Rtc,
    Watchdog,
    Clock,
    Interrupt,
    Flash,
    Crypto,
    Other,
}

impl PeripheralKind {
    /// Classify a peripheral by its `groupName`, falling back to its name
    pub fn classify(group_name: Option<&str>, name: &str) -> Self {
        group_name
            .map(Self::from_name)
            .filter(|k| *k != Self::Other)
            .unwrap_or_else(|| Self::from_name(name))
    }

    fn from_name(name: &str) -> Self {
        lazy_static! {
            // Patterns are matched in order. The first match wins.
            static ref PATTERNS: Vec<(Regex, PeripheralKind)> = [
                (r"^(GPIO|PIO|PORT|P[0-9])", PeripheralKind::Gpio),
                (r"^(L?P?US?ART|LEUART|SERCOM|UARTE?)", PeripheralKind::Uart),
                (r"^(Q?SPIM?|SPIS)", PeripheralKind::Spi),
                (r"^(I2C|TWIM?|TWIS)", PeripheralKind::I2c),
                (r"^(PWM|HRPWM)", PeripheralKind::Pwm),
                (r"^(L?P?TIM|TC[0-9C]?$|TCC|TIMER|SYSTICK|STK)", PeripheralKind::Timer),
                (r"^(ADC|SAADC)", PeripheralKind::Adc),
                (r"^DAC", PeripheralKind::Dac),
                (r"^(G?P?DMAC?|XDMAC|BDMA|MDMA)", PeripheralKind::Dma),
                (r"^(USB|OTG|UDP|UOTGHS)", PeripheralKind::Usb),
                (r"^(F?D?CAN|MCAN)", PeripheralKind::Can),
                (r"^(ETH|EMAC|GMAC)", PeripheralKind::Ethernet),
                (r"^RTC", PeripheralKind::Rtc),
                (r"^(I?WDT?G?|WWDG)", PeripheralKind::Watchdog),
                (r"^(RCC|PMC|CLOCK|CMU|SCG|CCM|OSCCTRL|GCLK)", PeripheralKind::Clock),
                (r"^(NVIC|EXTI|EIC|GIC|PLIC|CLIC)", PeripheralKind::Interrupt),
                (r"^(FLASH|EFC|NVMC|FMC|EEFC)", PeripheralKind::Flash),
                (r"^(AES|CRYP|HASH|RNG|TRNG|PKA|SHA)", PeripheralKind::Crypto),
            ]
            .into_iter()
            .map(|(re, kind)| (Regex::new(re).unwrap(), kind))
            .collect();
        }

        let name = name.to_uppercase();
        PATTERNS
            .iter()
            .find(|(re, _)| re.is_match(&name))
            .map_or(Self::Other, |(_, kind)| *kind)
    }
}

#[test]
fn classify_by_group_then_name() {
    assert_eq!(PeripheralKind::classify(None, "PIOA"), PeripheralKind::Gpio);
    assert_eq!(PeripheralKind::classify(None, "usart1"), PeripheralKind::Uart);
    assert_eq!(PeripheralKind::classify(None, "TC0"), PeripheralKind::Timer);
    assert_eq!(PeripheralKind::classify(None, "TWI0"), PeripheralKind::I2c);
    assert_eq!(
        PeripheralKind::classify(Some("TIM"), "MYSTERY"),
        PeripheralKind::Timer
    );
    // Unhelpful group names fall back to the peripheral name
    assert_eq!(
        PeripheralKind::classify(Some("MISC"), "WWDG"),
        PeripheralKind::Watchdog
    );
    assert_eq!(PeripheralKind::classify(None, "SUPC"), PeripheralKind::Other);
}
