//! Links into the scanning engine's web UI

/// Builds `resultLink` values from engine object references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLinks {
    base_url: String,
}

impl ResultLinks {
    pub fn new(host: &str, web_port: u16) -> Self {
        Self {
            base_url: format!("https://{}:{}/omp?cmd=", host, web_port),
        }
    }

    pub fn report(&self, report: &str) -> String {
        format!("{}get_report&report_id={}", self.base_url, report)
    }

    pub fn task(&self, task: &str) -> String {
        format!("{}get_task&task_id={}", self.base_url, task)
    }

    pub fn target(&self, target: &str) -> String {
        format!("{}get_target&target_id={}", self.base_url, target)
    }
}

impl Default for ResultLinks {
    fn default() -> Self {
        Self::new("127.0.0.1", 9392)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_formats() {
        let links = ResultLinks::new("scanner.lan", 9392);
        assert_eq!(
            links.report("r-1"),
            "https://scanner.lan:9392/omp?cmd=get_report&report_id=r-1"
        );
        assert_eq!(
            links.task("t-1"),
            "https://scanner.lan:9392/omp?cmd=get_task&task_id=t-1"
        );
        assert!(links.target("g-1").ends_with("get_target&target_id=g-1"));
    }
}
