//! Clinical record schema and vectorizer.
//!
//! A clinical record is a nested JSON object with six categories. Each category
//! is deserialized into a typed struct whose fields follow a fixed, ordered key
//! schema; the structs are then flattened into one fixed-length numeric vector
//! that is concatenated with the clip embedding by the fusion classifier.
//!
//! # Vector Layout (68 dimensions)
//!
//! | Range   | Category        | Keys |
//! |---------|-----------------|------|
//! | 0..5    | `patient_info`  | 5    |
//! | 5..11   | `vital_signs`   | 6    |
//! | 11..34  | `symptoms`      | 23   |
//! | 34..47  | `comorbidities` | 13   |
//! | 47..58  | `lab_findings`  | 11   |
//! | 58..68  | `outcomes`      | 10   |
//!
//! Deserialization never fails on values: numbers pass through, booleans map
//! to 1/0, numeric text is parsed, and anything else (missing, null,
//! unparseable, nested, non-finite) becomes `0.0`.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::Result;

// ---------------------------------------------------------------------------
// Scalar coercion
// ---------------------------------------------------------------------------

/// A clinical measurement coerced to a finite `f32`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Coerced(pub f32);

impl<'de> Deserialize<'de> for Coerced {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self(coerce(&value)))
    }
}

fn coerce(value: &Value) -> f32 {
    let raw = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Null | Value::Array(_) | Value::Object(_) => 0.0,
    };
    let narrowed = raw as f32;
    if narrowed.is_finite() {
        narrowed
    } else {
        0.0
    }
}

/// Biological sex, one-hot encoded as "is female".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FemaleIndicator(pub f32);

impl<'de> Deserialize<'de> for FemaleIndicator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let female = matches!(&value, Value::String(s) if s == "F");
        Ok(Self(if female { 1.0 } else { 0.0 }))
    }
}

// ---------------------------------------------------------------------------
// Category schemas
// ---------------------------------------------------------------------------

/// `patient_info` category. `sex` is stored in the vector as the `sex_F` slot.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PatientInfo {
    #[serde(default)]
    pub age: Coerced,
    #[serde(default)]
    pub sex: FemaleIndicator,
    #[serde(default)]
    pub weight: Coerced,
    #[serde(default)]
    pub height: Coerced,
    #[serde(default)]
    pub bmi: Coerced,
}

impl PatientInfo {
    /// Vector slot names in order.
    pub const KEYS: &'static [&'static str] = &["age", "sex_F", "weight", "height", "bmi"];

    fn extend_into(&self, out: &mut Vec<f32>) {
        out.extend([
            self.age.0,
            self.sex.0,
            self.weight.0,
            self.height.0,
            self.bmi.0,
        ]);
    }
}

/// Declares a category struct whose fields are all [`Coerced`] and whose vector
/// order is the declaration order.
macro_rules! clinical_category {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $field:ident => $key:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
        pub struct $name {
            $(
                #[serde(rename = $key, default)]
                pub $field: Coerced,
            )+
        }

        impl $name {
            /// External keys in vector order.
            pub const KEYS: &'static [&'static str] = &[$($key),+];

            fn extend_into(&self, out: &mut Vec<f32>) {
                $( out.push(self.$field.0); )+
            }
        }
    };
}

clinical_category! {
    /// `vital_signs` category.
    VitalSigns {
        respiratory_rate => "respiratory_rate",
        pulse => "pulse",
        body_temperature => "body_temperature",
        systolic_bp => "systolic_bp",
        diastolic_bp => "diastolic_bp",
        oxygen_saturation_without_ox => "oxygen_saturation_without_ox",
    }
}

clinical_category! {
    /// `symptoms` category.
    Symptoms {
        wheezing => "Wheezing",
        vomiting => "Vomitting",
        sore_throat => "Sore_throat",
        skin_rash => "Skin_rash",
        running_nose => "Running_nose",
        other => "Other",
        nausea => "Nausea",
        muscle_pain => "Muscle_pain",
        lymphadenopathy => "Lymphadenopathy",
        joint_pain => "Joint_pain",
        headache => "Headache",
        fever => "Fever",
        fatigue => "Fatigue",
        earache => "Earache",
        dyspnea => "Dyspnea",
        diarrhea => "Diarrhea",
        decreased_consciousness => "Decreased_consciousness",
        coughing => "Coughing",
        confusion => "Confusion",
        chest_pain => "Chest_pain",
        anosmia_hyposmia => "AnosmiaHyposmia",
        ageusia_dysgeusia => "AgeusiaDysgeusia",
        abdominal_pain => "Abdominal_pain",
    }
}

clinical_category! {
    /// `comorbidities` category.
    Comorbidities {
        stroke => "Stroke",
        renal_disease => "Renal_disease",
        none_of_the_above => "None_of_the_above",
        neurological_condition => "Neurological_condition",
        malignancy => "Malignancy",
        liver_disease => "Liver_disease",
        hypertonia => "Hypertonia",
        drug_or_alcohol_abuse => "History_of_drug_or_alcohol_abuse",
        diabetes_mellitus => "Diabetes_Mellitus",
        chronic_cardiovascular_disease => "Chronic_cardiovascular_disease",
        autoimmune_disease => "Autoimmune_disease",
        adipositas_bmi_30 => "Adipositas_BMI_30",
        aids_hiv => "AIDSHIV",
    }
}

clinical_category! {
    /// `lab_findings` category.
    LabFindings {
        crp => "CRP",
        ldh => "LDH",
        leucocytes => "leucocytes",
        lymphocytes => "lymphocytes",
        absolute_lymphocytes => "absolute_lymphocytes",
        hemoglobin => "hemoglobin",
        thrombocytes => "thrombocytes",
        ph => "pH",
        po2 => "pO2",
        pco2 => "pCO2",
        hco3 => "HCO3",
    }
}

clinical_category! {
    /// `outcomes` category.
    Outcomes {
        length_of_stay_total => "length_of_stay_total",
        length_of_stay_icu => "length_of_stay_ICU",
        length_of_stay_general_ward => "length_of_stay_general_ward",
        duration_oxygen_therapy => "duration_oxygen_therapy",
        outcome_status_d0 => "outcome_status_d0",
        outcome_status_d1 => "outcome_status_d1",
        outcome_status_d3 => "outcome_status_d3",
        outcome_status_d5 => "outcome_status_d5",
        outcome_status_d7 => "outcome_status_d7",
        outcome_status_d30 => "outcome_status_d30",
    }
}

/// Total clinical vector length (L).
pub const CLINICAL_DIM: usize = PatientInfo::KEYS.len()
    + VitalSigns::KEYS.len()
    + Symptoms::KEYS.len()
    + Comorbidities::KEYS.len()
    + LabFindings::KEYS.len()
    + Outcomes::KEYS.len();

/// Category names in vector order, paired with their slot names.
pub const SCHEMA: [(&str, &[&str]); 6] = [
    ("patient_info", PatientInfo::KEYS),
    ("vital_signs", VitalSigns::KEYS),
    ("symptoms", Symptoms::KEYS),
    ("comorbidities", Comorbidities::KEYS),
    ("lab_findings", LabFindings::KEYS),
    ("outcomes", Outcomes::KEYS),
];

/// Position of `category.key` in the clinical vector, if declared.
pub fn feature_index(category: &str, key: &str) -> Option<usize> {
    let mut offset = 0;
    for (name, keys) in SCHEMA {
        if name == category {
            return keys.iter().position(|k| *k == key).map(|i| offset + i);
        }
        offset += keys.len();
    }
    None
}

// ---------------------------------------------------------------------------
// Record + vector
// ---------------------------------------------------------------------------

/// A parsed clinical record. Absent or malformed categories are all-default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClinicalRecord {
    pub patient_info: PatientInfo,
    pub vital_signs: VitalSigns,
    pub symptoms: Symptoms,
    pub comorbidities: Comorbidities,
    pub lab_findings: LabFindings,
    pub outcomes: Outcomes,
}

impl<'de> Deserialize<'de> for ClinicalRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

impl ClinicalRecord {
    /// Build a record from an already-parsed JSON value. Never fails.
    pub fn from_value(value: &Value) -> Self {
        let Some(root) = value.as_object() else {
            return Self::default();
        };
        Self {
            patient_info: category(root, "patient_info"),
            vital_signs: category(root, "vital_signs"),
            symptoms: category(root, "symptoms"),
            comorbidities: category(root, "comorbidities"),
            lab_findings: category(root, "lab_findings"),
            outcomes: category(root, "outcomes"),
        }
    }

    /// Parse a record from JSON text.
    ///
    /// # Errors
    ///
    /// Fails only when `json` is not syntactically valid JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Flatten into the fixed-length clinical vector.
    pub fn vectorize(&self) -> ClinicalVector {
        let mut out = Vec::with_capacity(CLINICAL_DIM);
        self.patient_info.extend_into(&mut out);
        self.vital_signs.extend_into(&mut out);
        self.symptoms.extend_into(&mut out);
        self.comorbidities.extend_into(&mut out);
        self.lab_findings.extend_into(&mut out);
        self.outcomes.extend_into(&mut out);
        debug_assert_eq!(out.len(), CLINICAL_DIM);
        ClinicalVector(out)
    }
}

fn category<T: DeserializeOwned + Default>(root: &Map<String, Value>, key: &str) -> T {
    match root.get(key) {
        Some(value @ Value::Object(_)) => T::deserialize(value).unwrap_or_default(),
        _ => T::default(),
    }
}

/// Fixed-length (`CLINICAL_DIM`) vector of finite clinical features.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalVector(Vec<f32>);

impl ClinicalVector {
    /// All-zero vector, as produced by an empty record.
    pub fn zeros() -> Self {
        Self(vec![0.0; CLINICAL_DIM])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_clinical_dim() {
        assert_eq!(CLINICAL_DIM, 5 + 6 + 23 + 13 + 11 + 10);
        assert_eq!(CLINICAL_DIM, 68);
    }

    #[test]
    fn test_partial_patient_info() {
        let record = ClinicalRecord::from_json_str(r#"{"patient_info":{"age":45,"sex":"F"}}"#)
            .unwrap();
        let v = record.vectorize();
        assert_eq!(v.len(), CLINICAL_DIM);
        assert_eq!(&v.as_slice()[..5], &[45.0, 1.0, 0.0, 0.0, 0.0]);
        assert!(v.as_slice()[5..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_value_coercion() {
        let record = ClinicalRecord::from_value(&json!({
            "vital_signs": {
                "respiratory_rate": "18",
                "pulse": " 92.5 ",
                "body_temperature": "n/a",
                "systolic_bp": null,
                "diastolic_bp": [80],
                "oxygen_saturation_without_ox": true
            },
            "symptoms": { "Fever": false, "Coughing": 1 }
        }));
        let v = record.vectorize();
        let vitals = &v.as_slice()[5..11];
        assert_eq!(vitals, &[18.0, 92.5, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(v.as_slice()[feature_index("symptoms", "Fever").unwrap()], 0.0);
        assert_eq!(v.as_slice()[feature_index("symptoms", "Coughing").unwrap()], 1.0);
    }

    #[test]
    fn test_non_finite_values_become_zero() {
        let record = ClinicalRecord::from_value(&json!({
            "lab_findings": { "CRP": "NaN", "LDH": "inf", "pH": 1e300 }
        }));
        let v = record.vectorize();
        assert!(v.as_slice().iter().all(|x| x.is_finite()));
        assert_eq!(v.as_slice()[feature_index("lab_findings", "CRP").unwrap()], 0.0);
        assert_eq!(v.as_slice()[feature_index("lab_findings", "pH").unwrap()], 0.0);
    }

    #[test]
    fn test_sex_only_female_marker_counts() {
        for (sex, expected) in [("F", 1.0), ("M", 0.0), ("f", 0.0), ("", 0.0)] {
            let record = ClinicalRecord::from_value(&json!({"patient_info": {"sex": sex}}));
            assert_eq!(record.vectorize().as_slice()[1], expected, "sex={sex}");
        }
        let record = ClinicalRecord::from_value(&json!({"patient_info": {"sex": 1}}));
        assert_eq!(record.vectorize().as_slice()[1], 0.0);
    }

    #[test]
    fn test_malformed_categories_default_to_zero() {
        let record = ClinicalRecord::from_value(&json!({
            "patient_info": "unknown",
            "symptoms": null,
            "outcomes": [1, 2, 3],
            "unexpected": { "x": 1 }
        }));
        assert_eq!(record.vectorize(), ClinicalVector::zeros());

        let record = ClinicalRecord::from_value(&json!([1, 2, 3]));
        assert_eq!(record.vectorize(), ClinicalVector::zeros());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(ClinicalRecord::from_json_str("{not json").is_err());
    }

    #[test]
    fn test_schema_order_matches_vector() {
        let record = ClinicalRecord::from_value(&json!({
            "outcomes": { "outcome_status_d30": 3 },
            "comorbidities": { "Stroke": 1 }
        }));
        let v = record.vectorize();
        assert_eq!(v.as_slice()[CLINICAL_DIM - 1], 3.0);
        assert_eq!(feature_index("comorbidities", "Stroke"), Some(34));
        assert_eq!(v.as_slice()[34], 1.0);
        assert_eq!(feature_index("outcomes", "missing"), None);
        assert_eq!(feature_index("nope", "age"), None);
    }

    #[test]
    fn test_vectorize_is_deterministic() {
        let value = json!({"patient_info": {"age": "61", "bmi": 27.4}, "lab_findings": {"HCO3": 24}});
        let a = ClinicalRecord::from_value(&value).vectorize();
        let b = ClinicalRecord::from_value(&value).vectorize();
        assert_eq!(a, b);
    }

    fn all_slots() -> Vec<(&'static str, &'static str)> {
        SCHEMA
            .iter()
            .flat_map(|(category, keys)| keys.iter().map(move |k| (*category, *k)))
            .collect()
    }

    proptest! {
        #[test]
        fn prop_any_subset_of_keys_keeps_length_and_zero_fills(
            mask in proptest::collection::vec(any::<bool>(), CLINICAL_DIM),
            values in proptest::collection::vec(1.0f32..1000.0, CLINICAL_DIM),
        ) {
            let slots = all_slots();
            let mut root = Map::new();
            for (i, (category, key)) in slots.iter().enumerate() {
                if !mask[i] {
                    continue;
                }
                let entry = root
                    .entry(category.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                let (key, value) = if *key == "sex_F" {
                    ("sex", json!("F"))
                } else {
                    (*key, json!(values[i]))
                };
                if let Value::Object(map) = entry {
                    map.insert(key.to_string(), value);
                }
            }

            let v = ClinicalRecord::from_value(&Value::Object(root)).vectorize();
            prop_assert_eq!(v.len(), CLINICAL_DIM);
            for (i, (_, key)) in slots.iter().enumerate() {
                let got = v.as_slice()[i];
                if !mask[i] {
                    prop_assert_eq!(got, 0.0);
                } else if *key == "sex_F" {
                    prop_assert_eq!(got, 1.0);
                } else {
                    prop_assert_eq!(got, values[i]);
                }
            }
        }
    }
}
