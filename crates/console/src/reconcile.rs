use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// 数据库侧的月度条目数，来自 `GET /api/stats/monthly_counts`。
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MonthlyDbCount {
    pub year_month: String,
    pub count: i64,
}

/// 数据库条目与 Tushare 校验条目合并后的差异行。
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MonthlyCount {
    pub year_month: String,
    pub db_count: i64,
    pub verified_count: i64,
    pub diff: i64,
}

/// 由月度统计推导校验日期范围：最小年月的第一天到最大年月的最后一天。
/// 输入为空是调用方必须感知的错误，不做静默兜底。
pub fn plan_range(base: &[MonthlyDbCount]) -> Result<(NaiveDate, NaiveDate), String> {
    let mut months: Vec<&str> = base.iter().map(|m| m.year_month.as_str()).collect();
    months.sort_unstable();
    months.dedup();

    let (Some(first), Some(last)) = (months.first(), months.last()) else {
        return Err("错误：没有可用的年月数据".to_string());
    };

    let start = first_day_of_month(first)?;
    let end = last_day_of_month(first_day_of_month(last)?);
    Ok((start, end))
}

fn first_day_of_month(year_month: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(&format!("{year_month}-01"), "%Y-%m-%d")
        .map_err(|e| format!("无效的年月 {year_month}: {e}"))
}

fn last_day_of_month(first_day: NaiveDate) -> NaiveDate {
    let (year, month) = (first_day.year(), first_day.month());
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match next_month_first {
        Some(d) => d - Duration::days(1),
        None => first_day,
    }
}

/// 从完整执行记录中累计逐日成功条目，按年月汇总。
///
/// 每次对全量文本重新扫描，不做增量状态，保证可随时重算且幂等。
/// 不匹配的行（含 `各月统计：`、`[RESULT_JSON_START]` 等控制行）只是被跳过：
/// 脚本在这些标记之后不会再输出逐日记录，继续扫描无副作用。
pub fn scan_verified_counts(transcript: &str) -> Result<BTreeMap<String, i64>, String> {
    let re = Regex::new(r"(\d{4}-\d{2}-\d{2}) 成功，共 (\d+) 条记录").map_err(|e| e.to_string())?;
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for line in transcript.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let Ok(n) = caps[2].parse::<i64>() else {
            continue;
        };
        let year_month = caps[1][..7].to_string();
        *counts.entry(year_month).or_insert(0) += n;
    }
    Ok(counts)
}

/// 合并数据库条目与校验条目，顺序保持 base 原序；
/// 没有校验数据的月份按 0 处理。
pub fn merge(base: &[MonthlyDbCount], verified: &BTreeMap<String, i64>) -> Vec<MonthlyCount> {
    base.iter()
        .map(|row| {
            let verified_count = verified.get(&row.year_month).copied().unwrap_or(0);
            MonthlyCount {
                year_month: row.year_month.clone(),
                db_count: row.count,
                verified_count,
                diff: verified_count - row.count,
            }
        })
        .collect()
}
