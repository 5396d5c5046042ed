use once_cell::sync::OnceCell;

use anyhow::anyhow;
use rbatis::RBatis;
use rbdc_mysql::MysqlDriver;
use tracing::info;

static DB_CLIENT: OnceCell<RBatis> = OnceCell::new();

pub async fn init_db(db_url: &str, max_open_conns: u64) -> anyhow::Result<&'static RBatis> {
    let rb = RBatis::new();
    rb.link(MysqlDriver {}, db_url).await?;
    //这里建议 需要调整数据库的最大连接数
    rb.get_pool()?.set_max_open_conns(max_open_conns).await;
    info!("数据库连接成功, max_open_conns={}", max_open_conns);

    if DB_CLIENT.set(rb).is_err() {
        info!("DB_CLIENT 已初始化，复用已有连接池");
    }
    DB_CLIENT.get().ok_or_else(|| anyhow!("DB_CLIENT is not initialized"))
}

pub fn get_db_client() -> Option<&'static RBatis> {
    DB_CLIENT.get()
}
