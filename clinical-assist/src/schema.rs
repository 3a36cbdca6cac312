use serde_json::{Value, json};

/// Output schema the model must follow for an analysis, in the provider's
/// OpenAPI-subset dialect. Enumerations mirror the closed enums in `models`.
pub fn analysis_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "patientName": { "type": "STRING" },
            "patientId": { "type": "STRING" },
            "age": { "type": "NUMBER" },
            "vitals": {
                "type": "OBJECT",
                "properties": {
                    "bp": { "type": "STRING" },
                    "heartRate": { "type": "STRING" },
                    "temperature": { "type": "STRING" },
                    "spo2": { "type": "STRING" }
                }
            },
            "riskLevel": { "type": "STRING", "enum": ["low", "medium", "high"] },
            "riskScore": { "type": "NUMBER" },
            "summary": { "type": "STRING" },
            "findings": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "id": { "type": "STRING" },
                        "title": { "type": "STRING" },
                        "description": { "type": "STRING" },
                        "severity": {
                            "type": "STRING",
                            "enum": ["low", "medium", "high", "critical"]
                        },
                        "modalitySource": {
                            "type": "ARRAY",
                            "items": { "type": "STRING", "enum": ["report", "image", "video"] }
                        },
                        "confidence": { "type": "NUMBER" }
                    },
                    "required": ["title", "severity", "confidence"]
                }
            },
            "annotations": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "label": { "type": "STRING" },
                        "description": { "type": "STRING" },
                        "box2d": {
                            "type": "ARRAY",
                            "items": { "type": "NUMBER" },
                            "nullable": true,
                            "maxItems": 4
                        }
                    },
                    "required": ["label"]
                }
            },
            "recommendations": { "type": "ARRAY", "items": { "type": "STRING" } },
            "historicalComparison": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "metric": { "type": "STRING" },
                        "previous": { "type": "NUMBER" },
                        "current": { "type": "NUMBER" },
                        "unit": { "type": "STRING" },
                        "trend": {
                            "type": "STRING",
                            "enum": ["improving", "stable", "worsening"]
                        }
                    },
                    "required": ["metric", "previous", "current", "trend"]
                }
            }
        },
        "required": ["riskLevel", "riskScore", "summary", "findings"]
    })
}
