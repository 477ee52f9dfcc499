#![allow(dead_code)]

use fund_datahub::config::Config;
use std::time::Duration;

/// 测试用配置：指向 mock 服务器，无请求间隔
pub fn test_config(endpoint: &str) -> Config {
    Config::new()
        .with_endpoint(endpoint)
        .with_quote_endpoint(endpoint)
        .with_user_agent("fund-datahub-test")
        .with_request_delay(Duration::ZERO)
        .with_backoff_base(Duration::from_millis(1))
}

/// 天天基金 lsjz 风格的 JSONP 响应
pub fn history_body(rows: &[(&str, Option<&str>)], total: usize) -> String {
    let items: Vec<String> = rows
        .iter()
        .map(|(date, net)| {
            let net = match net {
                Some(v) => format!("\"{}\"", v),
                None => "null".to_string(),
            };
            format!(
                r#"{{"FSRQ":"{}","DWJZ":{},"LJJZ":"1.5000","JZZZL":"0.25","SGZT":"开放申购","SHZT":"开放赎回"}}"#,
                date, net
            )
        })
        .collect();

    format!(
        r#"jQuery18303({{"Data":{{"LSJZList":[{}],"FundType":"002","SYType":null}},"ErrCode":0,"ErrMsg":null,"TotalCount":{},"Expansion":null,"PageSize":20,"PageIndex":1}})"#,
        items.join(","),
        total
    )
}
