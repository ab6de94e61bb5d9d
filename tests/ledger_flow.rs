use assert_cmd::Command;

fn tuition_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("tuition"))
}

fn run_ok(home: &tempfile::TempDir, args: &[&str]) {
    let mut cmd = tuition_cmd();
    cmd.env("TUITION_HOME", home.path());
    cmd.args(args);
    cmd.assert().success();
}

fn run_ok_out(home: &tempfile::TempDir, args: &[&str]) -> String {
    let mut cmd = tuition_cmd();
    cmd.env("TUITION_HOME", home.path());
    cmd.args(args);
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).expect("utf8 stdout")
}

fn balance(home: &tempfile::TempDir, code: &str, month: &str) -> String {
    let out = run_ok_out(home, &["balance", "--account", code, "--month", month]);
    let line = out.trim().to_string();
    line.rsplit('\t').next().unwrap_or_default().to_string()
}

fn seed_account(home: &tempfile::TempDir, code: &str, batch: &str, start: &str) {
    run_ok(
        home,
        &[
            "account",
            "add",
            code,
            &format!("Student {code}"),
            "--batch",
            batch,
            "--billing-start",
            start,
        ],
    );
}

#[test]
fn charges_payments_and_monthly_report_reconcile() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_account(&home, "A", "50", "2024-01");

    let out = run_ok_out(&home, &["charge", "generate", "--through", "2024-03", "--fee", "100"]);
    assert!(out.contains("Posted 3 charge(s)"));

    // Re-running for the same months writes nothing new.
    let out = run_ok_out(&home, &["charge", "generate", "--through", "2024-03", "--fee", "100"]);
    assert!(out.contains("Posted 0 charge(s)"));

    run_ok(
        &home,
        &["pay", "A", "150", "--date", "2024-02-15", "--method", "cash"],
    );

    assert_eq!(balance(&home, "A", "2024-01"), "100");
    assert_eq!(balance(&home, "A", "2024-02"), "50");
    assert_eq!(balance(&home, "A", "2024-03"), "150");
    // Nothing happens before the billing start.
    assert_eq!(balance(&home, "A", "2023-12"), "0");

    let tsv = run_ok_out(
        &home,
        &[
            "report",
            "--account",
            "A",
            "--end",
            "2024-03",
            "--months-back",
            "2",
            "--format",
            "tsv",
        ],
    );
    let lines: Vec<&str> = tsv.lines().collect();
    assert_eq!(
        lines,
        vec![
            "month\tcharges\tadjustments\tpayments\tnet_change\tending_balance",
            "2024-01\t100\t0\t0\t100\t100",
            "2024-02\t100\t0\t150\t-50\t50",
            "2024-03\t100\t0\t0\t100\t150",
        ]
    );

    let csv = run_ok_out(
        &home,
        &[
            "report",
            "--account",
            "A",
            "--end",
            "2024-03",
            "--months-back=-5",
            "--format",
            "csv",
        ],
    );
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1], "2024-03,100,0,0,100,150");

    let table = run_ok_out(
        &home,
        &["report", "--account", "A", "--end", "2024-03", "--months-back", "1"],
    );
    assert!(table.contains("Report for A: 2024-02 to 2024-03"));
    assert!(table.contains("Opening balance: 100"));
    assert!(table.contains("ENDING BALANCE"));
}

#[test]
fn set_balance_appends_one_adjustment_and_keeps_history() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_account(&home, "A", "50th", "2024-01");
    run_ok(&home, &["charge", "generate", "--through", "2024-03", "--fee", "100"]);
    run_ok(&home, &["pay", "A", "150", "--date", "2024-02-15"]);

    let out = run_ok_out(
        &home,
        &["set-balance", "A", "0", "-m", "waived", "--date", "2024-03-20"],
    );
    assert!(out.contains("of -150 for A"));
    assert_eq!(balance(&home, "A", "2024-03"), "0");
    // Earlier months are untouched.
    assert_eq!(balance(&home, "A", "2024-02"), "50");

    let out = run_ok_out(&home, &["set-balance", "A", "0", "--date", "2024-03-25"]);
    assert!(out.contains("already 0"));

    let adjustments = run_ok_out(&home, &["adjustments", "A"]);
    assert!(adjustments.contains("2024-03-20"));
    assert!(adjustments.contains("waived"));
    assert!(!adjustments.contains("2024-03-25"));

    run_ok(&home, &["set-balance", "A", "-25", "--date", "2024-03-26"]);
    assert_eq!(balance(&home, "A", "2024-03"), "-25");
    let adjustments = run_ok_out(&home, &["adjustments", "A"]);
    assert!(adjustments.contains("Set balance to -25"));
}

#[test]
fn manual_adjustments_move_the_balance_on_their_date() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_account(&home, "A", "50th", "2024-01");
    run_ok(&home, &["charge", "generate", "--through", "2024-02", "--fee", "100"]);

    run_ok(
        &home,
        &["adjust", "A", "-30", "--date", "2024-02-29", "-m", "scholarship"],
    );
    assert_eq!(balance(&home, "A", "2024-01"), "100");
    assert_eq!(balance(&home, "A", "2024-02"), "170");
}

#[test]
fn batch_balance_sums_every_account_with_the_label() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_account(&home, "A", "50", "2024-01");
    seed_account(&home, "B", "50th batch", "2024-02");
    seed_account(&home, "C", "50th", "2024-03");
    seed_account(&home, "X", "51", "2024-01");

    run_ok(&home, &["charge", "generate", "--through", "2024-02", "--fee", "100"]);
    run_ok(&home, &["pay", "B", "40", "--date", "2024-02-10"]);

    let out = run_ok_out(&home, &["balance", "--batch", "50", "--month", "2024-02"]);
    assert_eq!(out.trim(), "batch 50th\t2024-02\t260");

    let report = run_ok_out(
        &home,
        &[
            "report", "--batch", "50th", "--end", "2024-02", "--months-back", "1", "--format",
            "tsv",
        ],
    );
    assert!(report.contains("2024-01\t100\t0\t0\t100\t100"));
    assert!(report.contains("2024-02\t200\t0\t40\t160\t260"));
}

#[test]
fn fee_defaults_come_from_config() {
    let home = tempfile::tempdir().expect("tempdir");
    let cfg_dir = home.path().join("config");
    std::fs::create_dir_all(&cfg_dir).expect("config dir");
    std::fs::write(
        cfg_dir.join("config.json"),
        r#"{ "monthly_fee": "250" }"#,
    )
    .expect("write config");

    seed_account(&home, "A", "50th", "2024-01");
    seed_account(&home, "B", "50th", "2024-01");
    run_ok(
        &home,
        &["charge", "generate", "--through", "2024-02", "--account", "A"],
    );

    assert_eq!(balance(&home, "A", "2024-02"), "500");
    assert_eq!(balance(&home, "B", "2024-02"), "0");

    let charges = run_ok_out(&home, &["charges", "A"]);
    assert!(charges.contains("TUITION"));
    assert!(charges.contains("250"));

    let mut cmd = tuition_cmd();
    cmd.env("TUITION_HOME", home.path());
    cmd.args(["charge", "generate", "--through", "2024-02", "--fee", "0"]);
    let err = cmd.assert().failure().get_output().stderr.clone();
    assert!(String::from_utf8_lossy(&err).contains("Monthly fee must be greater than zero"));
}

#[test]
fn one_broken_account_does_not_stop_a_charge_run() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_account(&home, "A", "50th", "2024-01");
    seed_account(&home, "B", "50th", "2024-01");
    seed_account(&home, "C", "50th", "2024-01");

    let conn = rusqlite::Connection::open(home.path().join("data").join("ledger.sqlite3"))
        .expect("open db");
    conn.execute(
        "UPDATE accounts SET billing_start_month = 'garbage' WHERE code = 'B'",
        [],
    )
    .expect("corrupt row");
    drop(conn);

    let mut cmd = tuition_cmd();
    cmd.env("TUITION_HOME", home.path());
    cmd.args(["charge", "generate", "--through", "2024-02", "--fee", "100"]);
    let output = cmd.assert().failure().get_output().clone();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains("Posted 4 charge(s)"));
    assert!(stderr.contains("B: Invalid billing_start_month in accounts table: 'garbage'"));
    assert!(stderr.contains("Charge generation failed for 1 account(s)"));

    assert_eq!(balance(&home, "A", "2024-02"), "200");
    assert_eq!(balance(&home, "C", "2024-02"), "200");
}

#[test]
fn stored_amounts_too_large_to_sum_fail_cleanly() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_account(&home, "A", "50th", "2024-01");

    let conn = rusqlite::Connection::open(home.path().join("data").join("ledger.sqlite3"))
        .expect("open db");
    for date in ["2024-01-02", "2024-01-03"] {
        conn.execute(
            "INSERT INTO adjustments (account_id, adj_date, amount) \
             SELECT id, ?1, '79228162514264337593543950335' FROM accounts WHERE code = 'A'",
            [date],
        )
        .expect("insert adjustment");
    }
    drop(conn);

    let mut cmd = tuition_cmd();
    cmd.env("TUITION_HOME", home.path());
    cmd.args(["balance", "--account", "A", "--month", "2024-01"]);
    let output = cmd.assert().code(1).get_output().clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error: Total of adjustments exceeds the supported amount range"));
    // Diagnostic detail stays out of the default log level.
    assert!(!stderr.contains("ledger operation failed"));

    let mut cmd = tuition_cmd();
    cmd.env("TUITION_HOME", home.path());
    cmd.args(["report", "--account", "A", "--end", "2024-01", "--months-back", "0"]);
    cmd.assert().code(1);
}

#[test]
fn charge_type_in_config_does_not_cause_double_billing() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_account(&home, "A", "50th", "2024-01");
    run_ok(&home, &["charge", "generate", "--through", "2024-03", "--fee", "100"]);

    std::fs::write(
        home.path().join("config").join("config.json"),
        r#"{ "monthly_fee": "100", "charge_type": "Tuition" }"#,
    )
    .expect("rewrite config");
    let out = run_ok_out(&home, &["charge", "generate", "--through", "2024-03"]);
    assert!(out.contains("Posted 0 charge(s)"));
    assert_eq!(balance(&home, "A", "2024-03"), "300");
}

#[test]
fn import_upserts_by_code_and_export_includes_balances() {
    let home = tempfile::tempdir().expect("tempdir");
    let src = home.path().join("students.csv");
    std::fs::write(
        &src,
        "Student ID,Name,Batch,CGPA,Semester CGPA,Billing Start\n\
         S-1,Ada,50,3.9,,2024-01-01\n\
         S-2,Bob,51st batch,,,2024-02\n\
         S-3,,50th,,,2024-01\n",
    )
    .expect("write csv");

    let out = run_ok_out(&home, &["account", "import", src.to_str().expect("utf8 path")]);
    assert!(out.contains("Imported 2 account(s); 1 row(s) failed."));

    std::fs::write(&src, "S-1,Ada King,50,3.9,,2024-01\n").expect("rewrite csv");
    run_ok(&home, &["account", "import", src.to_str().expect("utf8 path")]);

    run_ok(&home, &["pay", "S-1", "75", "--date", "2024-01-10"]);

    let dst = home.path().join("export.csv");
    run_ok(&home, &["account", "export", dst.to_str().expect("utf8 path")]);
    let exported = std::fs::read_to_string(&dst).expect("read export");
    let lines: Vec<&str> = exported.lines().collect();
    assert_eq!(
        lines,
        vec![
            "code,name,batch,cgpa,semester_cgpa,billing_start,balance",
            "S-1,Ada King,50th,3.9,,2024-01,-75",
            "S-2,Bob,51st,,,2024-02,0",
        ]
    );
}
