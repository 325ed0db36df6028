pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS check_states (
  delivery_config TEXT NOT NULL,
  environment TEXT NOT NULL,
  artifact_reference TEXT NOT NULL,
  version TEXT NOT NULL,
  check_id TEXT NOT NULL,
  status TEXT NOT NULL,
  started_at TEXT NOT NULL,
  ended_at TEXT,
  link TEXT,
  metadata_json TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (delivery_config, environment, artifact_reference, version, check_id)
);

CREATE TABLE IF NOT EXISTS constraint_states (
  delivery_config TEXT NOT NULL,
  environment TEXT NOT NULL,
  artifact_reference TEXT NOT NULL,
  version TEXT NOT NULL,
  constraint_type TEXT NOT NULL,
  status TEXT NOT NULL,
  created_at TEXT NOT NULL,
  judged_at TEXT,
  judged_by TEXT,
  comment TEXT,
  attributes_json TEXT,
  PRIMARY KEY (delivery_config, environment, artifact_reference, version, constraint_type)
);

CREATE TABLE IF NOT EXISTS pins (
  delivery_config TEXT NOT NULL,
  environment TEXT NOT NULL,
  reference TEXT NOT NULL,
  version TEXT NOT NULL,
  pinned_by TEXT NOT NULL,
  comment TEXT,
  pinned_at TEXT NOT NULL,
  PRIMARY KEY (delivery_config, environment, reference)
);

CREATE TABLE IF NOT EXISTS vetoes (
  delivery_config TEXT NOT NULL,
  environment TEXT NOT NULL,
  reference TEXT NOT NULL,
  version TEXT NOT NULL,
  vetoed_by TEXT NOT NULL,
  comment TEXT,
  vetoed_at TEXT NOT NULL,
  PRIMARY KEY (delivery_config, environment, reference, version)
);

CREATE TABLE IF NOT EXISTS promotions (
  delivery_config TEXT NOT NULL,
  environment TEXT NOT NULL,
  reference TEXT NOT NULL,
  version TEXT NOT NULL,
  status TEXT NOT NULL,
  seq INTEGER NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (delivery_config, environment, reference, version)
);

CREATE TABLE IF NOT EXISTS tasks (
  id TEXT PRIMARY KEY,
  application TEXT NOT NULL,
  environment TEXT NOT NULL,
  description TEXT NOT NULL,
  correlation_id TEXT,
  subject TEXT NOT NULL,
  stages_json TEXT NOT NULL,
  submitted_by TEXT NOT NULL,
  submitted_at TEXT NOT NULL,
  canceled_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_promotions_seq ON promotions(delivery_config, environment, reference, status, seq);
CREATE INDEX IF NOT EXISTS idx_tasks_application ON tasks(application, submitted_at);
"#;
