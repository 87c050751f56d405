//! # card-shard-store 完整使用案例
//!
//! 演示核心链路：
//!
//! 1. 写一个 250 行的源 Record Store
//! 2. Partitioner 按大小上限切成 3 个分片 + manifest.json
//! 3. 经 manifest 执行跨分片分页查询（id 降序全局窗口）
//! 4. 过滤查询与精确总数
//! 5. 去重聚合（国家 / 按国家限定的地区）
//! 6. 删掉一个分片，演示降级而不崩溃

use std::fs;
use std::path::Path;

use card_shard_store::{
    common::Result,
    partition::partition,
    query::{distinct, query, query_first_page},
    record::{CardFilter, CardRecord, DistinctColumn},
    store::StoreWriter,
};

fn demo_record(id: i64) -> CardRecord {
    let (cc, cn, rc, rn) = if id % 3 == 0 {
        ("FR", "France", "IDF", "Île-de-France")
    } else {
        ("US", "United States", "CA", "California")
    };
    CardRecord {
        id,
        card_number:  format!("4111{id:012}"),
        holder_name:  format!("Holder {id}"),
        issuer_name:  Some("First Example Bank".into()),
        issuer_url:   Some("https://bank.example".into()),
        logo_ref:     None,
        expiry:       Some("12/29".into()),
        country_code: Some(cc.into()),
        country_name: Some(cn.into()),
        region_code:  Some(rc.into()),
        region_name:  Some(rn.into()),
        city:         None,
        phone:        None,
        email:        None,
        latitude:     None,
        longitude:    None,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    println!("═══════════════════════════════════════════════════════════");
    println!("   card-shard-store 演示                                    ");
    println!("═══════════════════════════════════════════════════════════\n");

    let data_dir = Path::new("/tmp/card-shard-demo");
    let _ = fs::remove_dir_all(data_dir);
    fs::create_dir_all(data_dir).map_err(|e| {
        card_shard_store::common::StoreError::StoreIo(e.to_string())
    })?;

    // =========================================================================
    // 1. 写源库
    // =========================================================================
    println!("【1】写入 250 行源 Record Store ...");
    let source = data_dir.join("source.seg");
    let mut writer = StoreWriter::create(&source)?;
    for id in 1..=250 {
        writer.append(demo_record(id))?;
    }
    let stats = writer.finish()?;
    println!("    ✓ {} 行, {} 字节\n", stats.num_records, stats.file_bytes);

    // =========================================================================
    // 2. 切分
    // =========================================================================
    println!("【2】按大小上限切分 ...");
    let src_mb = stats.file_bytes as f64 / (1024.0 * 1024.0);
    let ceiling = src_mb * 100.5 / 250.0; // 演示用：凑出 100 行/片 → 3 片
    let manifest_path = partition(&source, data_dir, ceiling)?;
    println!("    ✓ manifest: {}\n", manifest_path.display());

    // =========================================================================
    // 3. 跨分片分页查询
    // =========================================================================
    println!("【3】无过滤窗口 limit=30 offset=90 ...");
    let page = query(&manifest_path, &CardFilter::default(), 30, 90)?;
    println!(
        "    total={} rows={} 首行 id={} 末行 id={}\n",
        page.total,
        page.rows.len(),
        page.rows.first().map(|r| r.id).unwrap_or(0),
        page.rows.last().map(|r| r.id).unwrap_or(0),
    );

    // =========================================================================
    // 4. 过滤查询
    // =========================================================================
    println!("【4】country=FR 的第一页 ...");
    let filter = CardFilter { country: Some("FR".into()), ..Default::default() };
    let fr = query(&manifest_path, &filter, 5, 0)?;
    let ids: Vec<i64> = fr.rows.iter().map(|r| r.id).collect();
    println!("    total={} 前 5 个 id={ids:?}\n", fr.total);

    // =========================================================================
    // 5. 去重聚合
    // =========================================================================
    println!("【5】去重聚合 ...");
    let countries = distinct(&manifest_path, DistinctColumn::CountryName, None)?;
    let fr_regions = distinct(&manifest_path, DistinctColumn::RegionName, Some("France"))?;
    println!("    countries={countries:?}");
    println!("    regions(France)={fr_regions:?}\n");

    // =========================================================================
    // 6. 缺失分片降级
    // =========================================================================
    println!("【6】删掉 cards_2.seg 再查询 ...");
    let _ = fs::remove_file(data_dir.join("cards_2.seg"));
    let degraded = query_first_page(&manifest_path, &CardFilter::default())?;
    println!(
        "    total={}（降级）skipped={:?}\n",
        degraded.total,
        degraded.skipped.iter().map(|s| s.path.clone()).collect::<Vec<_>>(),
    );

    println!("完成。");
    Ok(())
}
