use crate::model::{
    Classification, Language, Stability, StabilityAssessment, TestRecord, Zone,
};

/// Meaning and indicator text for a test item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purpose {
    pub meaning: String,
    pub indicator: String,
}

/// Source of the human-readable text attached to each report unit.
pub trait NarrativeProvider: Send + Sync {
    fn purpose(&self, record: &TestRecord, lang: Language) -> Option<Purpose>;

    fn suggestion(
        &self,
        record: &TestRecord,
        classification: &Classification,
        stability: Option<&StabilityAssessment>,
        lang: Language,
    ) -> Option<String>;
}

/// Broad RF/audio family of a test item, taken from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFamily {
    WlanTx,
    WlanRx,
    Gps,
    Bluetooth,
    Lte,
    Nr,
    Audio,
    Other,
}

impl ItemFamily {
    pub fn detect(test_item: &str) -> Self {
        let name = test_item.to_ascii_uppercase();
        if name.contains("WLAN") {
            if name.contains("_TX") {
                ItemFamily::WlanTx
            } else {
                ItemFamily::WlanRx
            }
        } else if name.contains("GPS") {
            ItemFamily::Gps
        } else if name.contains("BLUETOOTH") || name.contains("_BT_") {
            ItemFamily::Bluetooth
        } else if name.contains("LTE") {
            ItemFamily::Lte
        } else if name.contains("_NR") || name.contains("_NS_") {
            ItemFamily::Nr
        } else if name.contains("AUDIO") {
            ItemFamily::Audio
        } else {
            ItemFamily::Other
        }
    }

    fn meaning(self, lang: Language) -> &'static str {
        match (self, lang) {
            (ItemFamily::WlanTx, Language::En) => "Checks WLAN transmit power of the device.",
            (ItemFamily::WlanTx, Language::Zh) => "检查设备WLAN发射功率是否满足要求。",
            (ItemFamily::WlanRx, Language::En) => "Checks WLAN receive signal strength of the device.",
            (ItemFamily::WlanRx, Language::Zh) => "检查设备WLAN接收信号强度是否满足要求。",
            (ItemFamily::Gps, Language::En) => "Checks GPS carrier-to-noise on the received signal.",
            (ItemFamily::Gps, Language::Zh) => "检查GPS接收信号的载噪比。",
            (ItemFamily::Bluetooth, Language::En) => "Checks Bluetooth transmit power.",
            (ItemFamily::Bluetooth, Language::Zh) => "检查蓝牙发射功率。",
            (ItemFamily::Lte, Language::En) => "Checks LTE radiated power or signal level.",
            (ItemFamily::Lte, Language::Zh) => "检查LTE辐射功率或信号电平。",
            (ItemFamily::Nr, Language::En) => "Checks NR receive signal level.",
            (ItemFamily::Nr, Language::Zh) => "检查NR接收信号电平。",
            (ItemFamily::Audio, Language::En) => "Checks the acoustic response of the audio path.",
            (ItemFamily::Audio, Language::Zh) => "检查音频通路的声学响应。",
            (ItemFamily::Other, Language::En) => "Checks the measured value against its limits.",
            (ItemFamily::Other, Language::Zh) => "检查测量值是否在门限范围内。",
        }
    }
}

/// Short, family-level text built from the item name, limits and zone.
#[derive(Debug, Clone, Default)]
pub struct GenericNarrative;

impl NarrativeProvider for GenericNarrative {
    fn purpose(&self, record: &TestRecord, lang: Language) -> Option<Purpose> {
        let family = ItemFamily::detect(&record.test_item);
        let unit = if record.unit == crate::model::MISSING_FIELD {
            ""
        } else {
            record.unit.as_str()
        };
        let indicator = match lang {
            Language::En => format!(
                "{} should read between {} and {} {}",
                record.test_item, record.low_limit, record.up_limit, unit
            ),
            Language::Zh => format!(
                "{}读值应在{}至{}{}之间",
                record.test_item, record.low_limit, record.up_limit, unit
            ),
        };
        Some(Purpose {
            meaning: family.meaning(lang).to_string(),
            indicator: indicator.trim_end().to_string(),
        })
    }

    fn suggestion(
        &self,
        _record: &TestRecord,
        classification: &Classification,
        stability: Option<&StabilityAssessment>,
        lang: Language,
    ) -> Option<String> {
        if let Some(assessment) = stability
            && assessment.stability == Stability::Unstable
        {
            return Some(match lang {
                Language::En => "Readings are unstable. Retest first; if it keeps happening, confirm the test plan with the development engineer.".to_string(),
                Language::Zh => "测试读值不稳定。先复测，如果频繁出现，需和研发工程师确认测试方案是否合理。".to_string(),
            });
        }

        let zones = classification.zones();
        let out_of_spec = zones
            .iter()
            .any(|z| matches!(z, Zone::BelowRange | Zone::AboveRange));
        let text = if matches!(classification, Classification::NoValidData) {
            match lang {
                Language::En => "No valid readings. Check the fixture connection and the raw log for this item.",
                Language::Zh => "没有有效读值，请检查治具连接和该测试项的原始日志。",
            }
        } else if out_of_spec {
            match lang {
                Language::En => "Result is out of spec. Retest to see whether results are stable; if they are, review the limits with the development engineer.",
                Language::Zh => "测试结果超出门限。先复测确认结果是否稳定，如果稳定，需和研发工程师检查门限设置是否合理。",
            }
        } else if zones.contains(&Zone::LowerWithinRange) && !zones.contains(&Zone::UpperWithinRange) {
            match lang {
                Language::En => "Result is within limits but leans toward the lower limit. Watch for drift.",
                Language::Zh => "测试结果在门限内但偏向下限，需关注是否有漂移。",
            }
        } else if zones.contains(&Zone::UpperWithinRange) && !zones.contains(&Zone::LowerWithinRange) {
            match lang {
                Language::En => "Result is within limits but leans toward the upper limit. Watch for drift.",
                Language::Zh => "测试结果在门限内但偏向上限，需关注是否有漂移。",
            }
        } else {
            return None;
        };
        Some(text.to_string())
    }
}
