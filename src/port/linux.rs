use glob::glob;
use std::fs;
use std::path::Path;

/// Whether any process holds `port_name` open, judged from `/proc/*/fd`.
pub fn is_port_open(port_name: &str) -> bool {
    let port_path = fs::canonicalize(port_name).unwrap_or_else(|_| Path::new(port_name).into());

    let Ok(fds) = glob("/proc/[0-9]*/fd/*") else {
        return false;
    };

    fds.filter_map(|p| p.ok())
        .filter_map(|path| fs::read_link(path).ok())
        .any(|link| link == port_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_file_is_detected() {
        let path = std::env::temp_dir().join(format!("rrc-lib-port-{}", std::process::id()));
        let file = fs::File::create(&path).unwrap();

        assert!(is_port_open(path.to_str().unwrap()));

        drop(file);
        fs::remove_file(&path).unwrap();
        assert!(!is_port_open(path.to_str().unwrap()));
    }
}
