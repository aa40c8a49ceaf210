use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use cron::Schedule;

use cronbox_core::{SchedulerError, SchedulerResult};

/// 调度触发规则
///
/// 由调度表达式解析而来，三种形式：
/// - `cron:<分 时 日 月 周>`  标准5字段cron表达式
/// - `interval:<数字><s|m|h|d>`  固定间隔
/// - `date:<时间>`  一次性定时，支持RFC3339和本地风格的朴素时间
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron(Box<Schedule>),
    Interval(Duration),
    OneShot(DateTime<Utc>),
}

impl Trigger {
    /// 解析调度表达式
    pub fn parse(expr: &str) -> SchedulerResult<Self> {
        let expr = expr.trim();
        if let Some(rest) = expr.strip_prefix("cron:") {
            Self::parse_cron(expr, rest.trim())
        } else if let Some(rest) = expr.strip_prefix("interval:") {
            Self::parse_interval(expr, rest.trim())
        } else if let Some(rest) = expr.strip_prefix("date:") {
            Self::parse_date(expr, rest.trim())
        } else {
            Err(invalid(expr, "缺少 cron:/interval:/date: 前缀"))
        }
    }

    fn parse_cron(expr: &str, body: &str) -> SchedulerResult<Self> {
        let fields = body.split_whitespace().count();
        if fields != 5 {
            return Err(invalid(
                expr,
                format!("cron表达式应为5个字段，实际{fields}个"),
            ));
        }
        // cron库要求带秒字段，固定在第0秒触发
        let with_seconds = format!("0 {body}");
        let schedule = Schedule::from_str(&with_seconds)
            .map_err(|e| invalid(expr, format!("cron表达式无效: {e}")))?;
        Ok(Trigger::Cron(Box::new(schedule)))
    }

    fn parse_interval(expr: &str, body: &str) -> SchedulerResult<Self> {
        if body.len() < 2 {
            return Err(invalid(expr, "间隔格式应为 <数字><s|m|h|d>"));
        }
        let (number, unit) = body.split_at(body.len() - 1);
        let value: i64 = number
            .parse()
            .map_err(|_| invalid(expr, format!("间隔数值无效: {number}")))?;
        if value <= 0 {
            return Err(invalid(expr, "间隔必须为正整数"));
        }
        let duration = match unit {
            "s" => Duration::seconds(value),
            "m" => Duration::minutes(value),
            "h" => Duration::hours(value),
            "d" => Duration::days(value),
            other => return Err(invalid(expr, format!("未知的间隔单位: {other}"))),
        };
        Ok(Trigger::Interval(duration))
    }

    fn parse_date(expr: &str, body: &str) -> SchedulerResult<Self> {
        if let Ok(at) = DateTime::parse_from_rfc3339(body) {
            return Ok(Trigger::OneShot(at.with_timezone(&Utc)));
        }
        // 无时区的朴素时间按UTC处理
        for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(body, format) {
                return Ok(Trigger::OneShot(naive.and_utc()));
            }
        }
        Err(invalid(expr, format!("无法解析时间: {body}")))
    }

    /// 计算`from`之后的下一次触发时间
    ///
    /// 一次性触发的时间点已过时返回None，调度器据此卸载触发器。
    pub fn next_fire(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(schedule) => schedule.after(&from).next(),
            Trigger::Interval(interval) => Some(from + *interval),
            Trigger::OneShot(at) => (*at > from).then_some(*at),
        }
    }

    /// 接下来n次触发时间，用于展示
    pub fn upcoming(&self, from: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        match self {
            Trigger::Cron(schedule) => schedule.after(&from).take(n).collect(),
            Trigger::Interval(interval) => (1..=n as i64).map(|i| from + *interval * i as i32).collect(),
            Trigger::OneShot(_) => self.next_fire(from).into_iter().take(n).collect(),
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Trigger::OneShot(_))
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::Cron(_) => "cron".to_string(),
            Trigger::Interval(interval) => format!("每{}秒", interval.num_seconds()),
            Trigger::OneShot(at) => format!("一次性 {}", at.to_rfc3339()),
        }
    }
}

fn invalid(expr: &str, message: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidExpression {
        expr: expr.to_string(),
        message: message.into(),
    }
}
