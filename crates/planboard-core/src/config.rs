use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::Weekday;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::parse_weekday_name;

const RC_ENV_VAR: &str = "PLANBOARDRC";
const RC_FILE_NAME: &str =
  ".planboardrc";

const DEFAULTS: &[(&str, &str)] = &[
  ("data.location", "~/.planboard"),
  ("default.command", "month"),
  ("color", "on"),
  ("calendar.week_start", "sunday"),
  ("store.backend", "file"),
  (
    "store.timetable_table",
    "timetable_tasks"
  ),
  (
    "timetable.days",
    "mon,tue,wed,thu,fri"
  ),
  (
    "timetable.slots",
    "08:00,09:00,10:00"
  ),
  ("timetable.locked", "off")
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading planboardrc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no planboardrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  /// Comma or whitespace separated list value; empty items are dropped.
  pub fn get_list(
    &self,
    key: &str
  ) -> Vec<String> {
    self
      .map
      .get(key)
      .map(|raw| {
        raw
          .split(|c: char| {
            c == ',' || c.is_whitespace()
          })
          .map(str::trim)
          .filter(|item| !item.is_empty())
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default()
  }

  pub fn week_start(
    &self
  ) -> anyhow::Result<Weekday> {
    let raw = self
      .get("calendar.week_start")
      .unwrap_or_else(|| {
        "sunday".to_string()
      });
    parse_weekday_name(&raw).ok_or_else(
      || {
        anyhow!(
          "invalid calendar.week_start: \
           {raw}"
        )
      }
    )
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping \
       planboardrc lookup"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".planboard"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use chrono::Weekday;
  use tempfile::tempdir;

  use super::Config;

  #[test]
  fn loads_rc_file_with_includes() {
    let temp = tempdir().expect("tempdir");
    let extra = temp.path().join("extra.rc");
    fs::write(
      &extra,
      "timetable.slots = 07:30, 12:00\n"
    )
    .expect("write include");
    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# planboard\n\
       calendar.week_start = monday\n\
       color = off # no ansi\n\
       include extra.rc\n\
       include missing.rc\n"
    )
    .expect("write rc");

    let cfg =
      Config::load(Some(rc.as_path()))
        .expect("load rc");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.week_start().expect("week start"),
      Weekday::Mon
    );
    assert_eq!(
      cfg.get_bool("color"),
      Some(false)
    );
    assert_eq!(
      cfg.get_list("timetable.slots"),
      vec!["07:30", "12:00"]
    );
    assert_eq!(
      cfg.get("default.command").as_deref(),
      Some("month")
    );
  }

  #[test]
  fn rejects_lines_without_equals() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "week_start monday\n")
      .expect("write rc");
    assert!(
      Config::load(Some(rc.as_path()))
        .is_err()
    );
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![
      (
        "rc.calendar.week_start".to_string(),
        "sat".to_string()
      ),
      (
        "timetable.locked".to_string(),
        "yes".to_string()
      ),
    ]);
    assert_eq!(
      cfg.week_start().expect("week start"),
      Weekday::Sat
    );
    assert_eq!(
      cfg.get_bool("timetable.locked"),
      Some(true)
    );

    cfg.apply_overrides(vec![(
      "calendar.week_start".to_string(),
      "someday".to_string()
    )]);
    assert!(cfg.week_start().is_err());
  }
}
