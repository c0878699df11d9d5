//! SubscribeTarget - body から配送先を導出する

use serde_json::{Value, json};

/// SubscribeTarget は body から導出した配送先
///
/// # body の形式
/// - 文字列の `endPoint`（または `endpoint`）を持つ JSON object
///   - `params` が文字列ならそのまま、それ以外の JSON 値は compact に serialize
///   - `params` がない・null なら空
/// - それ以外の body は全体（trim 済み）が endpoint、params は空
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeTarget {
    pub endpoint: String,
    pub params: String,
}

impl SubscribeTarget {
    /// body を解析する。純粋関数（失敗しない・副作用なし）
    pub fn parse(body: &str) -> Self {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
            let endpoint = map
                .get("endPoint")
                .or_else(|| map.get("endpoint"))
                .and_then(Value::as_str);

            if let Some(endpoint) = endpoint {
                let params = match map.get("params") {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                };
                return Self {
                    endpoint: endpoint.to_string(),
                    params,
                };
            }
        }

        Self {
            endpoint: body.trim().to_string(),
            params: String::new(),
        }
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }

    /// socket に送るフレーム: `endpoint` または `endpoint/params`
    pub fn socket_destination(&self) -> String {
        if self.has_params() {
            format!("{}/{}", self.endpoint, self.params)
        } else {
            self.endpoint.clone()
        }
    }

    /// stateless 配送で `endpoint` に POST する JSON
    pub fn http_payload(&self) -> Value {
        json!({ "params": self.params })
    }
}
